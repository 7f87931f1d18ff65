//! Durable thread table of one client type plus transcript retrieval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{ParleyError, ParleyResult};
use crate::models::{
    Attachment, Conversation, ConversationMessage, LockedMap, MessageRole, ThreadRecord,
    ThreadTable,
};
use crate::providers::{
    AnnotationKind, MessageAttachment, NewMessage, ProviderClient, RemoteContent, RemoteMessage,
};
use crate::repositories::{ThreadRepository, ThreadStoreData};
use crate::settings::models::ClientType;

/// Metadata key marking a stored message as written by a chat assistant.
pub const CHAT_ASSISTANT_METADATA: &str = "chat_assistant";

pub const DEFAULT_THREAD_NAME: &str = "New Thread";

const USER_SENDER: &str = "user";

pub struct ConversationThreadStore {
    client_type: ClientType,
    client: Arc<dyn ProviderClient>,
    repository: Arc<dyn ThreadRepository>,
    table: Mutex<ThreadTable>,
    /// Per remote thread id; serializes attachment and message mutation.
    thread_locks: LockedMap<String, Arc<AsyncMutex<()>>>,
    file_names: LockedMap<String, String>,
}

impl ConversationThreadStore {
    pub fn new(
        client_type: ClientType,
        client: Arc<dyn ProviderClient>,
        repository: Arc<dyn ThreadRepository>,
    ) -> Self {
        Self {
            client_type,
            client,
            repository,
            table: Mutex::new(ThreadTable::default()),
            thread_locks: LockedMap::new(),
            file_names: LockedMap::new(),
        }
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn client(&self) -> Arc<dyn ProviderClient> {
        self.client.clone()
    }

    pub async fn load(&self) -> ParleyResult<()> {
        let data = self.repository.load(self.client_type).await?;
        info!(client_type = %self.client_type, threads = data.threads.len(), "Loaded threads");
        *self.table.lock() = ThreadTable::from_records(data.threads);
        Ok(())
    }

    pub async fn save(&self) -> ParleyResult<()> {
        let threads = self.table.lock().records().to_vec();
        debug!(client_type = %self.client_type, threads = threads.len(), "Saving threads");
        self.repository
            .save(self.client_type, ThreadStoreData { threads })
            .await?;
        Ok(())
    }

    /// Create a remote thread and store it under a unique name derived from
    /// `desired_name`.
    pub async fn create_thread(&self, desired_name: &str) -> ParleyResult<String> {
        let remote_id = self.client.create_thread().await?;
        let name = self.table.lock().add(&remote_id, desired_name);
        info!(thread = %name, thread_id = %remote_id, "Created thread");
        Ok(name)
    }

    pub async fn delete_thread(&self, name: &str) -> ParleyResult<()> {
        let remote_id = self.thread_id(name)?;
        self.client.delete_thread(&remote_id).await?;
        self.table.lock().remove_by_name(name);
        self.thread_locks.remove(&remote_id);
        info!(thread = %name, thread_id = %remote_id, "Deleted thread");
        Ok(())
    }

    /// Returns the unique name actually assigned.
    pub fn rename(&self, old_name: &str, new_name: &str) -> ParleyResult<String> {
        self.table
            .lock()
            .rename(old_name, new_name)
            .ok_or_else(|| ParleyError::UnknownThread {
                name: old_name.to_string(),
            })
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.table.lock().names()
    }

    pub fn records(&self) -> Vec<ThreadRecord> {
        self.table.lock().records().to_vec()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.lock().get(name).is_some()
    }

    pub fn thread_id(&self, name: &str) -> ParleyResult<String> {
        self.table
            .lock()
            .id_by_name(name)
            .ok_or_else(|| ParleyError::UnknownThread {
                name: name.to_string(),
            })
    }

    pub fn thread_name(&self, remote_id: &str) -> Option<String> {
        self.table.lock().name_by_id(remote_id)
    }

    pub fn set_current(&self, name: &str) -> ParleyResult<()> {
        if self.table.lock().set_current(name) {
            Ok(())
        } else {
            Err(ParleyError::UnknownThread {
                name: name.to_string(),
            })
        }
    }

    pub fn clear_current(&self) {
        self.table.lock().clear_current();
    }

    pub fn current(&self) -> Option<String> {
        self.table.lock().current_name()
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.current().as_deref() == Some(name)
    }

    pub fn attachments(&self, name: &str) -> Vec<Attachment> {
        self.table
            .lock()
            .get(name)
            .map(|t| t.attachments.clone())
            .unwrap_or_default()
    }

    pub fn additional_instructions(&self, name: &str) -> Option<String> {
        self.table
            .lock()
            .get(name)
            .and_then(|t| t.additional_instructions.clone())
    }

    pub fn set_additional_instructions(&self, name: &str, instructions: Option<String>) -> ParleyResult<()> {
        let mut table = self.table.lock();
        let record = table.get_mut(name).ok_or_else(|| ParleyError::UnknownThread {
            name: name.to_string(),
        })?;
        record.additional_instructions = instructions;
        Ok(())
    }

    /// Exclusive access to a thread's attachments and messages.
    pub async fn lock_thread(&self, name: &str) -> ParleyResult<OwnedMutexGuard<()>> {
        let remote_id = self.thread_id(name)?;
        let lock = self
            .thread_locks
            .compute_if_absent(remote_id, || Arc::new(AsyncMutex::new(())));
        Ok(lock.lock_owned().await)
    }

    /// Make the thread's attachments equal `desired`.
    ///
    /// Attachments missing from `desired` are detached and, unless images,
    /// deleted remotely. New attachments are uploaded unless a file with the
    /// same local path is already attached. Returns the attachments that
    /// were not on the thread before, with their file ids.
    ///
    /// Callers hold the thread lock.
    pub async fn reconcile_attachments(
        &self,
        name: &str,
        desired: &[Attachment],
    ) -> ParleyResult<Vec<Attachment>> {
        let current = {
            let table = self.table.lock();
            let record = table.get(name).ok_or_else(|| ParleyError::UnknownThread {
                name: name.to_string(),
            })?;
            record.attachments.clone()
        };

        for removed in current
            .iter()
            .filter(|c| !desired.iter().any(|d| d.refers_to_same_file(c)))
        {
            if removed.is_image() {
                continue;
            }
            if let Some(file_id) = &removed.file_id {
                if let Err(e) = self.client.delete_file(file_id).await {
                    warn!(file_id = %file_id, error = %e, "Failed to delete detached file");
                }
            }
        }

        let mut reconciled = Vec::with_capacity(desired.len());
        let mut added = Vec::new();
        for wanted in desired {
            if let Some(existing) = current.iter().find(|c| wanted.refers_to_same_file(c)) {
                let kept = Attachment {
                    kind: wanted.kind,
                    ..existing.clone()
                };
                reconciled.push(kept);
                continue;
            }

            let mut attachment = wanted.clone();
            if attachment.file_id.is_none() {
                let reused = current
                    .iter()
                    .chain(reconciled.iter())
                    .find(|c| c.file_path == attachment.file_path && c.file_id.is_some())
                    .and_then(|c| c.file_id.clone());
                let file_id = match reused {
                    Some(file_id) => file_id,
                    None => self.client.upload_file(&attachment.file_path).await?,
                };
                self.file_names.insert(file_id.clone(), attachment.file_name());
                attachment.file_id = Some(file_id);
            }
            added.push(attachment.clone());
            reconciled.push(attachment);
        }

        let mut table = self.table.lock();
        if let Some(record) = table.get_mut(name) {
            record.attachments = reconciled;
        }
        debug!(thread = %name, added = added.len(), "Reconciled attachments");
        Ok(added)
    }

    /// Append a user message referencing `new_attachments`.
    pub async fn create_message(
        &self,
        name: &str,
        text: &str,
        new_attachments: &[Attachment],
        metadata: HashMap<String, String>,
    ) -> ParleyResult<()> {
        let remote_id = self.thread_id(name)?;

        let mut message = NewMessage {
            content: text.to_string(),
            metadata,
            ..Default::default()
        };
        for attachment in new_attachments {
            let Some(file_id) = attachment.file_id.clone() else {
                continue;
            };
            if attachment.is_image() {
                message.image_file_ids.push(file_id);
            } else {
                message.attachments.push(MessageAttachment {
                    file_id,
                    kind: attachment.kind,
                });
            }
        }

        self.client.create_message(&remote_id, &message).await?;
        Ok(())
    }

    async fn file_name(&self, file_id: &str) -> String {
        if let Some(name) = self.file_names.get(&file_id.to_string()) {
            return name;
        }
        match self.client.file_info(file_id).await {
            Ok(info) if !info.filename.is_empty() => {
                self.file_names.insert(file_id.to_string(), info.filename.clone());
                info.filename
            }
            Ok(_) => file_id.to_string(),
            Err(e) => {
                debug!(file_id = %file_id, error = %e, "File name lookup failed");
                file_id.to_string()
            }
        }
    }

    async fn resolve_file_names(&self, messages: &[RemoteMessage]) -> HashMap<String, String> {
        let mut ids = HashSet::new();
        for message in messages {
            for content in &message.content {
                match content {
                    RemoteContent::Text { annotations, .. } => {
                        for annotation in annotations {
                            match &annotation.kind {
                                AnnotationKind::FileCitation { file_id }
                                | AnnotationKind::FilePath { file_id } => {
                                    ids.insert(file_id.clone());
                                }
                            }
                        }
                    }
                    RemoteContent::ImageFile { file_id } => {
                        ids.insert(file_id.clone());
                    }
                }
            }
        }

        let mut names = HashMap::with_capacity(ids.len());
        for id in ids {
            let name = self.file_name(&id).await;
            names.insert(id, name);
        }
        names
    }

    /// The thread's transcript, oldest first.
    ///
    /// `assistant_names` maps remote assistant ids to configured names. With
    /// `max_text_messages` only the newest text messages (and everything
    /// after the oldest of them) are kept.
    pub async fn retrieve_conversation(
        &self,
        name: &str,
        assistant_names: &HashMap<String, String>,
        max_text_messages: Option<usize>,
    ) -> ParleyResult<Conversation> {
        let remote_id = self.thread_id(name)?;
        let remote = self.client.list_messages(&remote_id, None).await?;
        let file_names = self.resolve_file_names(&remote).await;

        let mut messages: Vec<ConversationMessage> = remote
            .iter()
            .map(|m| {
                let (role, sender) = resolve_sender(m, assistant_names);
                ConversationMessage::from_remote(m, role, sender, &file_names)
            })
            .collect();

        if let Some(max) = max_text_messages {
            let mut texts = 0;
            let keep_from = messages
                .iter()
                .rposition(|m| {
                    if m.text_content().is_some() {
                        texts += 1;
                    }
                    texts > max
                })
                .map(|i| i + 1)
                .unwrap_or(0);
            messages.drain(..keep_from);
        }

        Ok(Conversation::new(name, messages))
    }
}

fn resolve_sender(message: &RemoteMessage, assistant_names: &HashMap<String, String>) -> (MessageRole, String) {
    match message.role {
        MessageRole::Assistant => {
            let sender = message
                .assistant_id
                .as_ref()
                .and_then(|id| assistant_names.get(id).cloned())
                .or_else(|| message.assistant_id.clone())
                .unwrap_or_else(|| "assistant".to_string());
            (MessageRole::Assistant, sender)
        }
        MessageRole::User => match message.metadata.get(CHAT_ASSISTANT_METADATA) {
            Some(chat_assistant) => (MessageRole::Assistant, chat_assistant.clone()),
            None => (MessageRole::User, USER_SENDER.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentKind;
    use crate::repositories::InMemoryThreadRepository;
    use crate::test_helpers::{ProviderCall, ScriptedProvider, assistant_text};
    use std::path::PathBuf;

    fn store() -> (ConversationThreadStore, Arc<ScriptedProvider>, InMemoryThreadRepository) {
        let provider = ScriptedProvider::shared();
        let repository = InMemoryThreadRepository::new();
        let store = ConversationThreadStore::new(
            ClientType::OpenAi,
            provider.clone(),
            Arc::new(repository.clone()),
        );
        (store, provider, repository)
    }

    #[tokio::test]
    async fn test_create_threads_with_unique_names() {
        let (store, _, _) = store();
        assert_eq!(store.create_thread("New Thread").await.unwrap(), "New Thread");
        assert_eq!(store.create_thread("New Thread").await.unwrap(), "New Thread 1");
        assert_eq!(store.thread_names(), vec!["New Thread", "New Thread 1"]);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let (store, provider, repository) = store();
        let name = store.create_thread("Research").await.unwrap();
        store
            .reconcile_attachments(&name, &[Attachment::new("/data/a.csv", AttachmentKind::CodeInterpreter)])
            .await
            .unwrap();
        store.save().await.unwrap();

        let reloaded = ConversationThreadStore::new(
            ClientType::OpenAi,
            provider,
            Arc::new(repository.clone()),
        );
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.records(), store.records());
        assert_eq!(reloaded.attachments("Research")[0].file_id.as_deref(), Some("file_2"));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (store, provider, _) = store();
        let name = store.create_thread("T").await.unwrap();
        let desired = vec![
            Attachment::new("/data/a.csv", AttachmentKind::CodeInterpreter),
            Attachment::new("/data/pic.png", AttachmentKind::Image),
        ];

        let added = store.reconcile_attachments(&name, &desired).await.unwrap();
        assert_eq!(added.len(), 2);
        let after_first = store.attachments(&name);

        let added = store.reconcile_attachments(&name, &desired).await.unwrap();
        assert!(added.is_empty());
        assert_eq!(store.attachments(&name), after_first);
        assert_eq!(provider.count_calls(|c| matches!(c, ProviderCall::UploadFile(_))), 2);
        assert_eq!(provider.count_calls(|c| matches!(c, ProviderCall::DeleteFile(_))), 0);
    }

    #[tokio::test]
    async fn test_removed_attachments_are_deleted_except_images() {
        let (store, provider, _) = store();
        let name = store.create_thread("T").await.unwrap();
        let csv = Attachment::new("/data/a.csv", AttachmentKind::FileSearch);
        let png = Attachment::new("/data/pic.png", AttachmentKind::Image);
        store
            .reconcile_attachments(&name, &[csv.clone(), png.clone()])
            .await
            .unwrap();
        let csv_id = store.attachments(&name)[0].file_id.clone().unwrap();

        store.reconcile_attachments(&name, &[]).await.unwrap();

        assert!(store.attachments(&name).is_empty());
        let deletes: Vec<_> = provider
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ProviderCall::DeleteFile(_)))
            .collect();
        assert_eq!(deletes, vec![ProviderCall::DeleteFile(csv_id)]);
    }

    #[tokio::test]
    async fn test_same_path_reuses_file_id() {
        let (store, provider, _) = store();
        let name = store.create_thread("T").await.unwrap();
        let path = PathBuf::from("/data/report.pdf");
        store
            .reconcile_attachments(&name, &[Attachment::new(&path, AttachmentKind::FileSearch)])
            .await
            .unwrap();

        let both = vec![
            Attachment::new(&path, AttachmentKind::FileSearch),
            Attachment::new(&path, AttachmentKind::CodeInterpreter),
        ];
        let added = store.reconcile_attachments(&name, &both).await.unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].file_id, store.attachments(&name)[0].file_id);
        assert_eq!(provider.count_calls(|c| matches!(c, ProviderCall::UploadFile(_))), 1);
    }

    #[tokio::test]
    async fn test_message_references_only_new_attachments() {
        let (store, provider, _) = store();
        let name = store.create_thread("T").await.unwrap();
        let added = store
            .reconcile_attachments(
                &name,
                &[
                    Attachment::new("/d/a.csv", AttachmentKind::CodeInterpreter),
                    Attachment::new("/d/b.png", AttachmentKind::Image),
                ],
            )
            .await
            .unwrap();
        store
            .create_message(&name, "look", &added, HashMap::new())
            .await
            .unwrap();

        let created = provider
            .calls()
            .into_iter()
            .find(|c| matches!(c, ProviderCall::CreateMessage { .. }))
            .unwrap();
        match created {
            ProviderCall::CreateMessage {
                attachment_ids,
                image_ids,
                ..
            } => {
                assert_eq!(attachment_ids.len(), 1);
                assert_eq!(image_ids.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_retrieve_conversation_resolves_senders() {
        let (store, provider, _) = store();
        let name = store.create_thread("T").await.unwrap();
        let thread_id = store.thread_id(&name).unwrap();

        store
            .create_message(&name, "Hello", &[], HashMap::new())
            .await
            .unwrap();
        provider.push_message(&thread_id, assistant_text("m2", "asst_9", "run_1", "Hi!"));
        store
            .create_message(
                &name,
                "From chat",
                &[],
                HashMap::from([(CHAT_ASSISTANT_METADATA.to_string(), "Chatter".to_string())]),
            )
            .await
            .unwrap();

        let names = HashMap::from([("asst_9".to_string(), "Helper".to_string())]);
        let conversation = store.retrieve_conversation(&name, &names, None).await.unwrap();
        let senders: Vec<_> = conversation.messages.iter().map(|m| m.sender.as_str()).collect();
        assert_eq!(senders, vec!["user", "Helper", "Chatter"]);
        assert_eq!(conversation.messages[2].role, MessageRole::Assistant);

        let limited = store.retrieve_conversation(&name, &names, Some(2)).await.unwrap();
        assert_eq!(limited.messages.len(), 2);
        assert_eq!(limited.messages[0].sender, "Helper");
    }

    #[tokio::test]
    async fn test_current_thread_survives_rename() {
        let (store, _, _) = store();
        let name = store.create_thread("Old").await.unwrap();
        store.set_current(&name).unwrap();
        let renamed = store.rename("Old", "New").unwrap();
        assert_eq!(renamed, "New");
        assert!(store.is_current("New"));
        assert!(matches!(
            store.set_current("missing"),
            Err(ParleyError::UnknownThread { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let (store, provider, _) = store();
        let name = store.create_thread("Doomed").await.unwrap();
        store.set_current(&name).unwrap();
        store.delete_thread(&name).await.unwrap();

        assert!(store.thread_names().is_empty());
        assert!(store.current().is_none());
        assert_eq!(provider.count_calls(|c| matches!(c, ProviderCall::DeleteThread(_))), 1);
    }

    #[tokio::test]
    async fn test_thread_lock_serializes() {
        let (store, _, _) = store();
        let name = store.create_thread("T").await.unwrap();
        let guard = store.lock_thread(&name).await.unwrap();

        let store = Arc::new(store);
        let waiter = {
            let store = store.clone();
            let name = name.clone();
            tokio::spawn(async move { store.lock_thread(&name).await.map(|_| ()) })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap().unwrap();
    }
}
