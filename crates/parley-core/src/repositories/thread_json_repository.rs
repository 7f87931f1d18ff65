use std::collections::BTreeMap;
use std::path::PathBuf;

use super::thread_repository::{ThreadRepository, ThreadStoreData};
use super::{BoxFuture, RepositoryError, RepositoryResult, write_json_atomically};
use crate::settings::models::ClientType;

/// JSON file repository for thread mappings.
///
/// One file holds a section per client type:
/// `{"OPEN_AI": {"threads": [...]}, "AZURE_OPEN_AI": {...}}`.
pub struct ThreadJsonRepository {
    file_path: PathBuf,
}

impl ThreadJsonRepository {
    pub fn new() -> RepositoryResult<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepositoryError::InitializationError {
            message: "Could not determine config directory".to_string(),
        })?;

        Ok(Self {
            file_path: config_dir.join("parley").join("threads.json"),
        })
    }

    /// Create repository with custom path (for testing)
    pub fn with_path(file_path: PathBuf) -> Self {
        Self { file_path }
    }
}

async fn read_sections(path: &PathBuf) -> RepositoryResult<BTreeMap<String, ThreadStoreData>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(BTreeMap::new());
    }
    let contents = tokio::fs::read_to_string(path).await?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

impl ThreadRepository for ThreadJsonRepository {
    fn load(&self, client_type: ClientType) -> BoxFuture<'static, RepositoryResult<ThreadStoreData>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let mut sections = read_sections(&path).await?;
            Ok(sections.remove(client_type.key()).unwrap_or_default())
        })
    }

    fn save(
        &self,
        client_type: ClientType,
        data: ThreadStoreData,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let mut sections = read_sections(&path).await?;
            sections.insert(client_type.key().to_string(), data);

            let json = serde_json::to_string_pretty(&sections)?;
            write_json_atomically(&path, json).await
        })
    }
}
