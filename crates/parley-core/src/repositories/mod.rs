pub mod error;
pub mod in_memory_repository;
pub mod thread_json_repository;
pub mod thread_repository;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryThreadRepository;
pub use thread_json_repository::ThreadJsonRepository;
pub use thread_repository::{ThreadRepository, ThreadStoreData};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write to a sibling temp file, then rename over the target.
pub(crate) async fn write_json_atomically(path: &Path, json: String) -> RepositoryResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, json).await?;
    tokio::fs::rename(&temp_path, path).await?;

    Ok(())
}
