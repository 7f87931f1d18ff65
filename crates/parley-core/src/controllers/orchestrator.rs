//! Fans user input and scheduled tasks out to the assistant controllers and
//! republishes what they report to the presentation layer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::run_controller::{AssistantRunController, RunContext, RunEventSink, RunSettings};
use super::scheduler::TaskEventHandler;
use crate::error::{ParleyError, ParleyResult};
use crate::factories::ClientRegistry;
use crate::functions::FunctionRegistry;
use crate::models::{
    AppEvent, Attachment, Conversation, DiagnosticsStore, LockedMap, ProcessingGuard,
    ProcessingStates, RunEvent, RunEventKind, RunState, RunSummary, RunUpdateStatus, TaskEvent,
    UpdatePayload, ViewEvent,
};
use crate::providers::ConnectionState;
use crate::repositories::ThreadRepository;
use crate::services::{
    ConversationThreadStore, DEFAULT_THREAD_NAME, EventBus, SCHEDULED_PREFIX, download_artifacts,
    generate_title,
};
use crate::settings::models::{AssistantConfig, ClientType, Settings};
use crate::settings::repositories::SettingsRepository;

/// Diagnostics outcome of a completed run that left no assistant text behind.
const MISSING_REPLY_OUTCOME: &str = "No message was found from the assistant in the thread. \
    This may be due to rate limiting; check the diagnostics for details.";

/// Everything the orchestrator works with, built once at process start.
pub struct OrchestratorContext {
    pub settings: Arc<RwLock<Settings>>,
    pub settings_repository: Arc<dyn SettingsRepository>,
    pub clients: Arc<ClientRegistry>,
    pub thread_repository: Arc<dyn ThreadRepository>,
    pub functions: Arc<FunctionRegistry>,
    pub bus: Arc<EventBus>,
    pub diagnostics: Arc<DiagnosticsStore>,
}

/// One piece of user input for one or more assistants.
#[derive(Clone, Debug, Default)]
pub struct SubmitRequest {
    pub text: String,
    pub assistants: Vec<String>,
    /// Target thread; a new thread is created when absent or unknown.
    pub thread_name: Option<String>,
    pub scheduled: bool,
    pub attachments: Vec<Attachment>,
}

impl SubmitRequest {
    pub fn new(text: impl Into<String>, assistants: &[&str]) -> Self {
        Self {
            text: text.into(),
            assistants: assistants.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = Some(thread_name.into());
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn scheduled(mut self) -> Self {
        self.scheduled = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionOutcome {
    pub thread: String,
    /// Empty for realtime submissions.
    pub runs: Vec<RunSummary>,
}

/// A submission queued on the worker pool.
pub struct SubmissionHandle {
    task: JoinHandle<ParleyResult<SubmissionOutcome>>,
}

impl SubmissionHandle {
    pub async fn wait(self) -> ParleyResult<SubmissionOutcome> {
        self.task
            .await
            .map_err(|e| ParleyError::Worker(e.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    context: OrchestratorContext,
    controllers: LockedMap<String, Arc<AssistantRunController>>,
    thread_stores: LockedMap<ClientType, Arc<ConversationThreadStore>>,
    processing: ProcessingStates,
    pool: Arc<Semaphore>,
    pool_size: usize,
    /// Schedule id -> remote thread id. Held across lookup-or-create.
    schedule_bindings: AsyncMutex<HashMap<String, String>>,
}

impl Orchestrator {
    pub fn new(context: OrchestratorContext) -> Self {
        let (assistants, general) = {
            let settings = context.settings.read();
            (settings.assistants.clone(), settings.general.clone())
        };

        let controllers = LockedMap::new();
        for config in assistants {
            let controller = AssistantRunController::new(
                config.clone(),
                context.clients.clone(),
                context.functions.clone(),
                RunSettings::from(&general),
            );
            controllers.insert(config.name, Arc::new(controller));
        }

        let pool_size = general.worker_pool_size();
        info!(assistants = controllers.len(), workers = pool_size, "Orchestrator ready");
        Self {
            shared: Arc::new(Shared {
                processing: ProcessingStates::new(context.bus.clone()),
                context,
                controllers,
                thread_stores: LockedMap::new(),
                pool: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                schedule_bindings: AsyncMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.shared.context.bus.clone()
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticsStore> {
        self.shared.context.diagnostics.clone()
    }

    pub fn active_client_type(&self) -> ClientType {
        self.shared.active_client_type()
    }

    pub fn assistant_names(&self) -> Vec<String> {
        let mut names = self.shared.controllers.keys();
        names.sort();
        names
    }

    pub fn assistant(&self, name: &str) -> Option<AssistantConfig> {
        self.shared
            .controllers
            .get(&name.to_string())
            .map(|c| c.config())
    }

    pub fn processing_assistants(&self) -> Vec<String> {
        self.shared.processing.processing_assistants()
    }

    pub fn is_processing(&self, assistant: &str) -> bool {
        self.shared.processing.is_processing(assistant)
    }

    /// Add or replace an assistant and persist the settings.
    pub async fn upsert_assistant(&self, config: AssistantConfig) -> ParleyResult<()> {
        let name = config.name.clone();
        self.shared.context.settings.write().upsert_assistant(config.clone());
        let general = self.shared.context.settings.read().general.clone();
        let context = &self.shared.context;
        let controller = self.shared.controllers.compute_if_absent(name, || {
            Arc::new(AssistantRunController::new(
                config.clone(),
                context.clients.clone(),
                context.functions.clone(),
                RunSettings::from(&general),
            ))
        });
        controller.update_config(config);
        self.shared.save_settings().await
    }

    /// Queue `request` on the worker pool.
    ///
    /// Fails immediately, before any provider call, when an assistant is
    /// unknown or no provider client is configured for the active client
    /// type or an assistant's client type.
    pub fn submit(&self, request: SubmitRequest) -> ParleyResult<SubmissionHandle> {
        if request.assistants.is_empty() {
            return Err(ParleyError::NoAssistantSelected);
        }
        self.shared
            .context
            .clients
            .get(self.shared.active_client_type())?;
        for name in &request.assistants {
            let controller = self.shared.controller(name)?;
            self.shared.context.clients.get(controller.config().client_type)?;
        }

        self.shared.publish(ViewEvent::UserMessage {
            thread: request.thread_name.clone(),
            text: request.text.clone(),
        });

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let _permit = shared
                .pool
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ParleyError::Worker("worker pool closed".to_string()))?;

            let result = shared.process_input(request).await;
            if let Err(e) = &result {
                error!(error = %e, "Submission failed");
                if e.is_user_facing() {
                    shared.publish(ViewEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            result
        });
        Ok(SubmissionHandle { task })
    }

    /// Cancel the runs of every assistant.
    pub fn cancel_all(&self) {
        let mut cancelled = 0;
        for controller in self.shared.controllers.values() {
            if controller.cancel() {
                cancelled += 1;
            }
        }
        info!(assistants = cancelled, "Cancel requested for all runs");
    }

    pub fn cancel_assistant(&self, name: &str) -> ParleyResult<bool> {
        Ok(self.shared.controller(name)?.cancel())
    }

    // ─── threads ───

    pub async fn thread_names(&self) -> ParleyResult<Vec<String>> {
        Ok(self.shared.active_store().await?.thread_names())
    }

    pub async fn current_thread(&self) -> ParleyResult<Option<String>> {
        Ok(self.shared.active_store().await?.current())
    }

    /// Create a thread and make it the displayed one.
    pub async fn create_thread(&self, desired_name: Option<&str>) -> ParleyResult<String> {
        let store = self.shared.active_store().await?;
        let name = store
            .create_thread(desired_name.unwrap_or(DEFAULT_THREAD_NAME))
            .await?;
        store.set_current(&name)?;
        self.shared.publish(ViewEvent::ThreadCreated {
            name: name.clone(),
            scheduled: false,
        });
        Ok(name)
    }

    /// Display `name` and publish its transcript and attachments.
    pub async fn select_thread(&self, name: &str) -> ParleyResult<Conversation> {
        let store = self.shared.active_store().await?;
        store.set_current(name)?;
        let conversation = self.shared.load_conversation(&store, name).await?;
        self.shared.publish(ViewEvent::ConversationRefreshed {
            conversation: conversation.clone(),
        });
        self.shared.publish(ViewEvent::AttachmentsUpdated {
            thread: name.to_string(),
            attachments: store.attachments(name),
        });
        Ok(conversation)
    }

    pub async fn conversation(&self, name: &str) -> ParleyResult<Conversation> {
        let store = self.shared.active_store().await?;
        self.shared.load_conversation(&store, name).await
    }

    pub async fn rename_thread(&self, old_name: &str, new_name: &str) -> ParleyResult<String> {
        let store = self.shared.active_store().await?;
        let assigned = store.rename(old_name, new_name)?;
        self.shared.publish(ViewEvent::ThreadRenamed {
            old_name: old_name.to_string(),
            new_name: assigned.clone(),
        });
        Ok(assigned)
    }

    /// Cancel runs on the thread, then delete it remotely and locally.
    pub async fn delete_thread(&self, name: &str) -> ParleyResult<()> {
        let store = self.shared.active_store().await?;
        let thread_id = store.thread_id(name)?;
        for controller in self.shared.controllers.values() {
            controller.cancel_thread(&thread_id);
        }
        store.delete_thread(name).await?;
        self.shared.publish(ViewEvent::ThreadDeleted {
            name: name.to_string(),
        });
        Ok(())
    }

    pub async fn set_additional_instructions(
        &self,
        name: &str,
        instructions: Option<String>,
    ) -> ParleyResult<()> {
        self.shared
            .active_store()
            .await?
            .set_additional_instructions(name, instructions)
    }

    // ─── realtime ───

    /// Connect a realtime assistant to a thread.
    pub async fn connect_assistant(&self, name: &str, thread: &str) -> ParleyResult<()> {
        let controller = self.shared.controller(name)?;
        let store = self.shared.active_store().await?;
        let thread_id = store.thread_id(thread)?;
        controller
            .connect(thread, &thread_id, self.shared.bound_sink(store))
            .await
    }

    pub async fn disconnect_assistant(&self, name: &str) -> ParleyResult<()> {
        let controller = self.shared.controller(name)?;
        controller.disconnect(self.shared.clone()).await;
        Ok(())
    }

    // ─── lifecycle ───

    /// Persist the current client type's threads and switch to `client_type`.
    pub async fn set_active_client_type(&self, client_type: ClientType) -> ParleyResult<()> {
        let previous = self.shared.active_client_type();
        if previous == client_type {
            return Ok(());
        }

        if let Some(store) = self.shared.thread_stores.get(&previous) {
            store.save().await?;
        }
        if previous.is_realtime() {
            self.shared.disconnect_realtime().await;
        }

        self.shared.context.settings.write().general.active_client_type = client_type;
        self.shared.save_settings().await?;
        info!(from = %previous, to = %client_type, "Switched client type");
        Ok(())
    }

    /// Persist everything, close realtime sessions and wait for in-flight
    /// submissions.
    pub async fn shutdown(&self) -> ParleyResult<()> {
        info!("Shutting down orchestrator");
        self.shared.disconnect_realtime().await;

        let permits = u32::try_from(self.shared.pool_size).unwrap_or(u32::MAX);
        match self.shared.pool.acquire_many(permits).await {
            Ok(drained) => {
                drained.forget();
                self.shared.pool.close();
            }
            Err(_) => debug!("Worker pool already closed"),
        }

        for store in self.shared.thread_stores.values() {
            if let Err(e) = store.save().await {
                warn!(client_type = %store.client_type(), error = %e, "Failed to save threads");
            }
        }
        self.shared.save_settings().await
    }
}

#[async_trait]
impl TaskEventHandler for Orchestrator {
    async fn on_task_event(&self, event: TaskEvent) -> ParleyResult<()> {
        match event {
            TaskEvent::Started {
                schedule_id,
                assistant,
            } => {
                info!(schedule_id = %schedule_id, assistant = %assistant, "Scheduled task started");
                Ok(())
            }
            TaskEvent::Execute {
                schedule_id,
                assistant,
                request,
            } => {
                let thread = self
                    .shared
                    .bind_schedule(&schedule_id, &assistant, &request)
                    .await?;
                let submission = SubmitRequest {
                    text: request,
                    assistants: vec![assistant],
                    thread_name: Some(thread),
                    scheduled: true,
                    attachments: Vec::new(),
                };
                let outcome = self.submit(submission)?.wait().await?;
                match outcome.runs.iter().find_map(|r| r.failure.clone()) {
                    Some(failure) => Err(ParleyError::Provider {
                        code: failure.code,
                        message: failure.message,
                    }),
                    None => Ok(()),
                }
            }
            TaskEvent::Completed {
                schedule_id,
                result,
                ..
            } => {
                info!(schedule_id = %schedule_id, result = %result, "Scheduled task completed");
                self.shared.unbind_schedule(&schedule_id).await;
                Ok(())
            }
            TaskEvent::Failed {
                schedule_id, error, ..
            } => {
                warn!(schedule_id = %schedule_id, error = %error, "Scheduled task failed");
                self.shared.unbind_schedule(&schedule_id).await;
                Ok(())
            }
        }
    }
}

impl Shared {
    fn publish(&self, event: ViewEvent) {
        self.context.bus.publish(AppEvent::View(event));
    }

    fn active_client_type(&self) -> ClientType {
        self.context.settings.read().general.active_client_type
    }

    fn controller(&self, name: &str) -> ParleyResult<Arc<AssistantRunController>> {
        self.controllers
            .get(&name.to_string())
            .ok_or_else(|| ParleyError::UnknownAssistant {
                name: name.to_string(),
            })
    }

    /// The loaded thread store of `client_type`, loading it on first use.
    async fn thread_store(&self, client_type: ClientType) -> ParleyResult<Arc<ConversationThreadStore>> {
        if let Some(store) = self.thread_stores.get(&client_type) {
            return Ok(store);
        }

        let client = self.context.clients.get(client_type)?;
        let store = Arc::new(ConversationThreadStore::new(
            client_type,
            client,
            self.context.thread_repository.clone(),
        ));
        store.load().await?;
        if self.thread_stores.try_insert(client_type, store.clone()) {
            Ok(store)
        } else {
            self.thread_stores
                .get(&client_type)
                .ok_or(ParleyError::NotConfigured { client_type })
        }
    }

    async fn active_store(&self) -> ParleyResult<Arc<ConversationThreadStore>> {
        self.thread_store(self.active_client_type()).await
    }

    async fn save_settings(&self) -> ParleyResult<()> {
        let snapshot = self.context.settings.read().clone();
        self.context.settings_repository.save(snapshot).await?;
        Ok(())
    }

    fn assistant_names_by_id(&self) -> HashMap<String, String> {
        self.context
            .settings
            .read()
            .assistants
            .iter()
            .filter_map(|a| a.assistant_id.clone().map(|id| (id, a.name.clone())))
            .collect()
    }

    async fn load_conversation(
        &self,
        store: &ConversationThreadStore,
        thread: &str,
    ) -> ParleyResult<Conversation> {
        let max_text_messages = self.context.settings.read().general.max_text_messages;
        store
            .retrieve_conversation(thread, &self.assistant_names_by_id(), max_text_messages)
            .await
    }

    /// Re-fetch and publish the transcript of the displayed thread.
    async fn refresh_current(
        &self,
        store: &ConversationThreadStore,
        thread: &str,
    ) -> ParleyResult<Conversation> {
        if !self.is_displayed(store, thread) {
            return Err(ParleyError::StaleContext {
                thread: thread.to_string(),
            });
        }
        let conversation = self.load_conversation(store, thread).await?;
        self.publish(ViewEvent::ConversationRefreshed {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    fn title_model(&self, assistants: &[String]) -> Option<String> {
        let settings = self.context.settings.read();
        settings.general.title_model.clone().or_else(|| {
            assistants
                .first()
                .and_then(|name| settings.assistant(name))
                .map(|a| a.model.clone())
        })
    }

    /// Rename a fresh thread after the user's text when title generation is
    /// on. Returns the (possibly unchanged) name.
    async fn apply_title(
        &self,
        store: &ConversationThreadStore,
        thread: &str,
        text: &str,
        assistants: &[String],
        scheduled: bool,
    ) -> String {
        if !self.context.settings.read().general.use_system_assistant_for_thread_name {
            return thread.to_string();
        }
        let Some(model) = self.title_model(assistants) else {
            return thread.to_string();
        };

        let client = store.client();
        let title = match generate_title(client.as_ref(), &model, thread, text, scheduled).await {
            Ok(title) => title,
            Err(e) => {
                warn!(thread = %thread, error = %e, "Title generation failed");
                return thread.to_string();
            }
        };
        match store.rename(thread, &title) {
            Ok(assigned) => {
                self.publish(ViewEvent::ThreadRenamed {
                    old_name: thread.to_string(),
                    new_name: assigned.clone(),
                });
                assigned
            }
            Err(e) => {
                warn!(thread = %thread, error = %e, "Thread rename failed");
                thread.to_string()
            }
        }
    }

    async fn process_input(self: &Arc<Self>, request: SubmitRequest) -> ParleyResult<SubmissionOutcome> {
        let store = self.active_store().await?;

        let known = request
            .thread_name
            .as_deref()
            .filter(|name| store.contains(name))
            .map(str::to_string);
        let thread = match known {
            Some(thread) => thread,
            None => {
                let created = store.create_thread(DEFAULT_THREAD_NAME).await?;
                if !request.scheduled {
                    store.set_current(&created)?;
                }
                self.publish(ViewEvent::ThreadCreated {
                    name: created.clone(),
                    scheduled: request.scheduled,
                });
                self.apply_title(
                    &store,
                    &created,
                    &request.text,
                    &request.assistants,
                    request.scheduled,
                )
                .await
            }
        };
        let thread_id = store.thread_id(&thread)?;

        let _thread_lock = store.lock_thread(&thread).await?;
        let added = store
            .reconcile_attachments(&thread, &request.attachments)
            .await?;
        self.publish(ViewEvent::AttachmentsUpdated {
            thread: thread.clone(),
            attachments: store.attachments(&thread),
        });
        store
            .create_message(&thread, &request.text, &added, HashMap::new())
            .await?;
        let user_request = match self.refresh_current(&store, &thread).await {
            Ok(conversation) => conversation.last_user_text(),
            Err(ParleyError::StaleContext { .. }) => None,
            Err(e) => return Err(e),
        }
        .unwrap_or_else(|| request.text.clone());

        let first_is_realtime = request
            .assistants
            .first()
            .and_then(|name| self.controllers.get(name))
            .is_some_and(|c| c.config().is_realtime());
        if first_is_realtime {
            for name in &request.assistants {
                let controller = self.controller(name)?;
                controller
                    .connect(&thread, &thread_id, self.bound_sink(store.clone()))
                    .await?;
                controller.generate_response(&request.text).await?;
            }
            return Ok(SubmissionOutcome {
                thread,
                runs: Vec::new(),
            });
        }

        let mut runs = Vec::with_capacity(request.assistants.len());
        for name in &request.assistants {
            let controller = self.controller(name)?;
            let context = RunContext {
                thread_name: thread.clone(),
                thread_id: thread_id.clone(),
                additional_instructions: store.additional_instructions(&thread),
                user_request: user_request.clone(),
                scheduled: request.scheduled,
            };
            match controller.start(context, self.bound_sink(store.clone())).await {
                Ok(summary) => {
                    self.persist_assistant_id(&controller).await;
                    runs.push(summary);
                }
                Err(e) => {
                    warn!(assistant = %name, thread = %thread, error = %e, "Run could not start");
                    self.publish(ViewEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(SubmissionOutcome { thread, runs })
    }

    /// Store a remote assistant id created during a run.
    async fn persist_assistant_id(&self, controller: &AssistantRunController) {
        let config = controller.config();
        let changed = {
            let mut settings = self.context.settings.write();
            let stored = settings.assistant(&config.name).map(|a| a.assistant_id.clone());
            if stored.is_some_and(|id| id != config.assistant_id) {
                settings.upsert_assistant(config.clone());
                true
            } else {
                false
            }
        };
        if changed && let Err(e) = self.save_settings().await {
            warn!(assistant = %config.name, error = %e, "Failed to persist assistant id");
        }
    }

    /// Thread bound to `schedule_id`, created with the first execution.
    async fn bind_schedule(
        &self,
        schedule_id: &str,
        assistant: &str,
        request: &str,
    ) -> ParleyResult<String> {
        let mut bindings = self.schedule_bindings.lock().await;
        let store = self.active_store().await?;

        if let Some(thread) = bindings
            .get(schedule_id)
            .and_then(|thread_id| store.thread_name(thread_id))
        {
            return Ok(thread);
        }

        let created = store
            .create_thread(&format!("{SCHEDULED_PREFIX}{DEFAULT_THREAD_NAME}"))
            .await?;
        self.publish(ViewEvent::ThreadCreated {
            name: created.clone(),
            scheduled: true,
        });
        let thread = self
            .apply_title(&store, &created, request, &[assistant.to_string()], true)
            .await;
        bindings.insert(schedule_id.to_string(), store.thread_id(&thread)?);
        info!(schedule_id = %schedule_id, thread = %thread, "Bound schedule to thread");
        Ok(thread)
    }

    async fn unbind_schedule(&self, schedule_id: &str) {
        if self.schedule_bindings.lock().await.remove(schedule_id).is_some() {
            debug!(schedule_id = %schedule_id, "Schedule binding released");
        }
    }

    async fn disconnect_realtime(self: &Arc<Self>) {
        for controller in self.controllers.values() {
            if controller.connection_state() != ConnectionState::Disconnected {
                controller.disconnect(self.clone()).await;
            }
        }
    }

    /// Reconcile after a terminal state: diagnostics, transcript, artifacts.
    async fn on_run_ended(&self, store: &ConversationThreadStore, event: &RunEvent, state: RunState) {
        let conversation = match self.load_conversation(store, &event.thread).await {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!(thread = %event.thread, error = %e, "Failed to reconcile conversation");
                return;
            }
        };

        match conversation.last_text_message(&event.assistant) {
            Some(text) => {
                self.context
                    .diagnostics
                    .set_run_outcome(&event.assistant, event.run_id.as_deref(), text);
            }
            None if state == RunState::Completed => {
                warn!(assistant = %event.assistant, thread = %event.thread, "No assistant reply found after run");
                self.context.diagnostics.set_run_outcome(
                    &event.assistant,
                    event.run_id.as_deref(),
                    MISSING_REPLY_OUTCOME.to_string(),
                );
            }
            None => {}
        }
        if self.is_displayed(store, &event.thread) {
            self.publish(ViewEvent::ConversationRefreshed {
                conversation: conversation.clone(),
            });
        }

        if state != RunState::Completed {
            return;
        }
        let output_folder = self
            .controllers
            .get(&event.assistant)
            .and_then(|c| c.config().output_folder_path);
        if let Some(folder) = output_folder {
            let client = store.client();
            let written = download_artifacts(client.as_ref(), &conversation.messages, &folder).await;
            if !written.is_empty() {
                info!(assistant = %event.assistant, files = written.len(), "Downloaded artifacts");
            }
        }
    }

    /// Whether `thread` of `store` is what the presentation layer shows.
    fn is_displayed(&self, store: &ConversationThreadStore, thread: &str) -> bool {
        store.client_type() == self.active_client_type() && store.is_current(thread)
    }

    /// A sink reconciling runs against `store`, whatever client type is
    /// active by the time they report.
    fn bound_sink(self: &Arc<Self>, store: Arc<ConversationThreadStore>) -> Arc<dyn RunEventSink> {
        Arc::new(ThreadSink {
            shared: self.clone(),
            store,
        })
    }

    async fn handle_run_event(&self, store: &ConversationThreadStore, event: RunEvent) {
        self.context.diagnostics.record_run_event(&event);
        self.context.bus.publish(AppEvent::Run(event.clone()));

        if let RunEventKind::Ended { state } = &event.kind {
            self.on_run_ended(store, &event, *state).await;
            return;
        }
        if !self.is_displayed(store, &event.thread) {
            debug!(thread = %event.thread, "Dropping signal for a thread that is not displayed");
            return;
        }

        match event.kind {
            RunEventKind::Updated {
                status: RunUpdateStatus::Streaming,
                is_first_chunk,
                payload: Some(UpdatePayload::Text(text)),
            } => self.publish(ViewEvent::StreamChunk {
                assistant: event.assistant,
                thread: event.thread,
                text,
                is_first_chunk,
            }),
            RunEventKind::Updated {
                status: RunUpdateStatus::InProgress,
                payload: Some(UpdatePayload::Message(message)),
                ..
            } => self.publish(ViewEvent::MessageAppended {
                thread: event.thread,
                message,
            }),
            RunEventKind::Updated {
                status: RunUpdateStatus::Completed,
                ..
            } => match self.refresh_current(store, &event.thread).await {
                Ok(_) | Err(ParleyError::StaleContext { .. }) => {}
                Err(e) => warn!(thread = %event.thread, error = %e, "Transcript refresh failed"),
            },
            _ => {}
        }
    }
}

/// Run sink bound to the thread store a submission or connection started on.
struct ThreadSink {
    shared: Arc<Shared>,
    store: Arc<ConversationThreadStore>,
}

#[async_trait]
impl RunEventSink for ThreadSink {
    async fn on_run_event(&self, event: RunEvent) {
        self.shared.handle_run_event(&self.store, event).await;
    }

    fn begin_processing(&self, assistant: &str, scheduled: bool) -> ProcessingGuard {
        self.shared.begin_processing(assistant, scheduled)
    }

    fn connection_changed(&self, assistant: &str, state: ConnectionState, thread: Option<&str>) {
        self.shared.connection_changed(assistant, state, thread);
    }
}

#[async_trait]
impl RunEventSink for Shared {
    async fn on_run_event(&self, event: RunEvent) {
        match self.active_store().await {
            Ok(store) => self.handle_run_event(&store, event).await,
            Err(e) => {
                self.context.diagnostics.record_run_event(&event);
                self.context.bus.publish(AppEvent::Run(event));
                debug!(error = %e, "No thread store for run event");
            }
        }
    }

    fn begin_processing(&self, assistant: &str, scheduled: bool) -> ProcessingGuard {
        self.processing.begin(assistant, scheduled)
    }

    fn connection_changed(&self, assistant: &str, state: ConnectionState, thread: Option<&str>) {
        match state {
            ConnectionState::Connected => self.publish(ViewEvent::Connected {
                assistant: assistant.to_string(),
                thread: thread.unwrap_or_default().to_string(),
            }),
            ConnectionState::Disconnected => self.publish(ViewEvent::Disconnected {
                assistant: assistant.to_string(),
            }),
            ConnectionState::Connecting => {
                debug!(assistant = %assistant, "Realtime assistant connecting");
            }
        }
    }
}
