use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::thread_repository::{ThreadRepository, ThreadStoreData};
use super::{BoxFuture, RepositoryResult};
use crate::settings::models::ClientType;

/// In-memory repository for threads
/// Useful for testing and development
#[derive(Clone, Default)]
pub struct InMemoryThreadRepository {
    sections: Arc<Mutex<HashMap<ClientType, ThreadStoreData>>>,
    saves: Arc<Mutex<usize>>,
}

impl InMemoryThreadRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed save calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    pub fn snapshot(&self, client_type: ClientType) -> Option<ThreadStoreData> {
        self.sections.lock().get(&client_type).cloned()
    }
}

impl ThreadRepository for InMemoryThreadRepository {
    fn load(&self, client_type: ClientType) -> BoxFuture<'static, RepositoryResult<ThreadStoreData>> {
        let sections = self.sections.clone();

        Box::pin(async move { Ok(sections.lock().get(&client_type).cloned().unwrap_or_default()) })
    }

    fn save(
        &self,
        client_type: ClientType,
        data: ThreadStoreData,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let sections = self.sections.clone();
        let saves = self.saves.clone();

        Box::pin(async move {
            sections.lock().insert(client_type, data);
            *saves.lock() += 1;
            Ok(())
        })
    }
}
