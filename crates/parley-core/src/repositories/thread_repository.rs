use serde::{Deserialize, Serialize};

use super::{BoxFuture, RepositoryResult};
use crate::models::ThreadRecord;
use crate::settings::models::ClientType;

/// Persisted threads of one client type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadStoreData {
    #[serde(default)]
    pub threads: Vec<ThreadRecord>,
}

pub trait ThreadRepository: Send + Sync + 'static {
    /// Load the threads saved for `client_type`; empty on first run.
    fn load(&self, client_type: ClientType) -> BoxFuture<'static, RepositoryResult<ThreadStoreData>>;

    /// Replace the threads saved for `client_type`, keeping other sections.
    fn save(
        &self,
        client_type: ClientType,
        data: ThreadStoreData,
    ) -> BoxFuture<'static, RepositoryResult<()>>;
}
