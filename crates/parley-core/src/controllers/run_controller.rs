//! One assistant's processing of runs: submission, streaming or polling,
//! tool round-trips, cancellation and the realtime session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, warn};

use super::realtime_link::RealtimeLink;
use crate::error::{ParleyError, ParleyResult};
use crate::factories::ClientRegistry;
use crate::functions::FunctionRegistry;
use crate::models::{
    LockedMap, ProcessingGuard, RunEvent, RunFailure, RunState, RunSummary, RunTermination,
};
use crate::providers::{
    AssistantDefinition, ConnectionState, EventStream, NewMessage, ProviderClient, ProviderError,
    ProviderEvent, RunHandle, RunRequest, RunStatus, ToolCall, ToolOutput,
};
use crate::services::{
    CHAT_ASSISTANT_METADATA, RunEventTranslator, ToolInvocationCoordinator, TranslatorStep,
};
use crate::settings::models::{AssistantConfig, GeneralSettings};

/// Receiver of everything a controller reports.
#[async_trait]
pub trait RunEventSink: Send + Sync {
    /// Lifecycle signals of one run arrive in emission order; the
    /// controller waits for each call before continuing.
    async fn on_run_event(&self, event: RunEvent);

    /// Mark the assistant busy until the guard is dropped.
    fn begin_processing(&self, assistant: &str, scheduled: bool) -> ProcessingGuard;

    fn connection_changed(&self, assistant: &str, state: ConnectionState, thread: Option<&str>);
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSettings {
    pub use_streaming: bool,
    pub poll_interval: Duration,
    pub connection_timeout: Duration,
}

impl From<&GeneralSettings> for RunSettings {
    fn from(settings: &GeneralSettings) -> Self {
        Self {
            use_streaming: settings.use_streaming,
            poll_interval: settings.poll_interval(),
            connection_timeout: settings.connection_timeout(),
        }
    }
}

/// What a run is submitted for.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub thread_name: String,
    pub thread_id: String,
    pub additional_instructions: Option<String>,
    /// Last user text of the thread, reported with `Started`.
    pub user_request: String,
    pub scheduled: bool,
}

/// Cancellation and state of one in-flight run.
pub(crate) struct ActiveRun {
    state: Mutex<RunState>,
    run_id: Mutex<Option<String>>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

impl ActiveRun {
    fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            run_id: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, next: RunState) {
        let mut state = self.state.lock();
        let current = *state;
        if !current.can_transition_to(next) {
            debug!(from = %current, to = %next, "Unexpected run state transition");
        }
        *state = next;
    }

    fn set_run_id(&self, run_id: Option<&str>) {
        if let Some(run_id) = run_id {
            *self.run_id.lock() = Some(run_id.to_string());
        }
    }

    fn request_cancel(&self) -> bool {
        let state = self.state();
        if !(state.is_cancellable() || state == RunState::Idle) {
            return false;
        }
        let run_id = self.run_id.lock().clone();
        debug!(run_id = ?run_id, state = %state, "Cancel requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
        true
    }

    fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.cancel_notify.notified();
            if self.is_cancel_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// Removes the run-lock entry on every exit path.
struct RunLock<'a> {
    runs: &'a LockedMap<String, Arc<ActiveRun>>,
    thread_id: String,
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.thread_id);
    }
}

pub struct AssistantRunController {
    config: RwLock<AssistantConfig>,
    registry: Arc<ClientRegistry>,
    functions: Arc<FunctionRegistry>,
    settings: RwLock<RunSettings>,
    /// Run-lock: at most one active run per thread id.
    active: LockedMap<String, Arc<ActiveRun>>,
    realtime: RealtimeLink,
}

impl AssistantRunController {
    pub fn new(
        config: AssistantConfig,
        registry: Arc<ClientRegistry>,
        functions: Arc<FunctionRegistry>,
        settings: RunSettings,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            registry,
            functions,
            settings: RwLock::new(settings),
            active: LockedMap::new(),
            realtime: RealtimeLink::new(),
        }
    }

    pub fn name(&self) -> String {
        self.config.read().name.clone()
    }

    pub fn config(&self) -> AssistantConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: AssistantConfig) {
        *self.config.write() = config;
    }

    pub fn update_settings(&self, settings: RunSettings) {
        *self.settings.write() = settings;
    }

    pub fn is_running(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn is_running_on(&self, thread_id: &str) -> bool {
        self.active.contains_key(&thread_id.to_string())
    }

    /// State of the active run on `thread_id`, `Idle` if there is none.
    pub fn run_state(&self, thread_id: &str) -> RunState {
        self.active
            .get(&thread_id.to_string())
            .map(|run| run.state())
            .unwrap_or(RunState::Idle)
    }

    /// Process the thread once.
    ///
    /// Fails with `NotConfigured` when no provider client is bound for the
    /// assistant's client type and with `RunInProgress` when the thread
    /// already has an active run. Everything after that is reported through
    /// the run's terminal state. Realtime assistants connect instead.
    pub async fn start(
        &self,
        context: RunContext,
        sink: Arc<dyn RunEventSink>,
    ) -> ParleyResult<RunSummary> {
        let config = self.config();
        if config.is_realtime() {
            self.connect(&context.thread_name, &context.thread_id, sink)
                .await?;
            return Ok(RunSummary {
                assistant: config.name,
                thread: context.thread_name,
                run_id: None,
                state: RunState::Idle,
                failure: None,
            });
        }

        let client = self.registry.get(config.client_type)?;

        let run = Arc::new(ActiveRun::new());
        if !self.active.try_insert(context.thread_id.clone(), run.clone()) {
            return Err(ParleyError::RunInProgress {
                assistant: config.name,
                thread: context.thread_name,
            });
        }
        let _run_lock = RunLock {
            runs: &self.active,
            thread_id: context.thread_id.clone(),
        };
        let _processing = sink.begin_processing(&config.name, context.scheduled);

        let mut translator =
            RunEventTranslator::new(&config.name, &context.thread_name, &context.user_request);
        info!(assistant = %config.name, thread = %context.thread_name, "Run submitted");

        let termination = if config.is_chat() {
            self.drive_chat(client.as_ref(), &config, &context, &run, &mut translator, &sink)
                .await
        } else {
            match self.ensure_assistant(client.as_ref()).await {
                Ok(assistant_id) => {
                    let request = RunRequest {
                        thread_id: context.thread_id.clone(),
                        assistant_id,
                        additional_instructions: context.additional_instructions.clone(),
                    };
                    if self.settings.read().use_streaming {
                        self.drive_stream(client.as_ref(), &request, &run, &mut translator, &sink)
                            .await
                    } else {
                        self.drive_poll(client.as_ref(), &request, &run, &mut translator, &sink)
                            .await
                    }
                }
                Err(e) => RunTermination::Failed(provider_failure(&e)),
            }
        };

        run.set_state(termination.state());
        let finish = translator.finish(&termination);
        emit(&sink, finish).await;

        let failure = match &termination {
            RunTermination::Failed(failure) => {
                warn!(assistant = %config.name, thread = %context.thread_name, failure = %failure, "Run failed");
                Some(failure.clone())
            }
            _ => {
                info!(assistant = %config.name, thread = %context.thread_name, state = %termination.state(), "Run finished");
                None
            }
        };

        Ok(RunSummary {
            assistant: config.name,
            thread: context.thread_name,
            run_id: translator.run_id().map(str::to_string),
            state: termination.state(),
            failure,
        })
    }

    /// Cancel every active run of this assistant. Returns whether any run
    /// accepted the request.
    pub fn cancel(&self) -> bool {
        let mut any = false;
        for run in self.active.values() {
            any |= run.request_cancel();
        }
        any
    }

    pub fn cancel_thread(&self, thread_id: &str) -> bool {
        self.active
            .get(&thread_id.to_string())
            .is_some_and(|run| run.request_cancel())
    }

    /// Cancel runs, or close the realtime session.
    pub async fn stop(&self, sink: Arc<dyn RunEventSink>) {
        if self.config.read().is_realtime() {
            self.disconnect(sink).await;
        } else {
            self.cancel();
        }
    }

    async fn ensure_assistant(&self, client: &dyn ProviderClient) -> Result<String, ProviderError> {
        let config = self.config();
        if let Some(id) = config.assistant_id {
            return Ok(id);
        }

        let definition = AssistantDefinition {
            name: config.name.clone(),
            model: config.model.clone(),
            instructions: config.instructions.clone(),
            functions: self.functions.definitions(&config.selected_functions),
            code_interpreter: config.code_interpreter,
            file_search: config.file_search,
        };
        let id = client.create_assistant(&definition).await?;
        info!(assistant = %config.name, assistant_id = %id, "Remote assistant created");
        self.config.write().assistant_id = Some(id.clone());
        Ok(id)
    }

    async fn drive_stream(
        &self,
        client: &dyn ProviderClient,
        request: &RunRequest,
        run: &ActiveRun,
        translator: &mut RunEventTranslator,
        sink: &Arc<dyn RunEventSink>,
    ) -> RunTermination {
        let connection_timeout = self.settings.read().connection_timeout;
        run.set_state(RunState::Submitted);

        let mut stream = match open_stream(client.stream_run(request), connection_timeout).await {
            Ok(stream) => stream,
            Err(termination) => return termination,
        };
        run.set_state(RunState::Streaming);

        let mut cancel_deadline: Option<Instant> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = run.cancelled(), if cancel_deadline.is_none() => {
                    cancel_deadline = Some(Instant::now() + connection_timeout);
                    send_cancel(client, &request.thread_id, translator.run_id()).await;
                    continue;
                }
                _ = sleep_until(cancel_deadline.unwrap_or_else(Instant::now)), if cancel_deadline.is_some() => {
                    warn!(run_id = ?translator.run_id(), "No terminal event after cancel; declaring run cancelled");
                    return RunTermination::Cancelled;
                }
                item = timeout(connection_timeout, stream.next()) => item,
            };

            let event = match next {
                Ok(Some(event)) => event,
                _ if cancel_deadline.is_some() => return RunTermination::Cancelled,
                Ok(None) => {
                    return RunTermination::Failed(RunFailure::exception(
                        "incomplete_stream",
                        "The event stream ended before the run finished",
                    ));
                }
                Err(_) => return RunTermination::Failed(response_timeout(connection_timeout)),
            };

            let had_run_id = translator.run_id().is_some();
            let (events, step) = translator.translate(event);
            run.set_run_id(translator.run_id());
            if !had_run_id && cancel_deadline.is_some() {
                send_cancel(client, &request.thread_id, translator.run_id()).await;
            }
            emit(sink, events).await;

            match step {
                TranslatorStep::Continue => {}
                TranslatorStep::Terminal(termination) => return termination,
                TranslatorStep::ToolCallsRequired { run_id, calls } => {
                    if cancel_deadline.is_some() {
                        return RunTermination::Cancelled;
                    }
                    run.set_state(RunState::RequiresToolOutput);
                    let handle = RunHandle {
                        thread_id: request.thread_id.clone(),
                        run_id,
                    };
                    if calls.is_empty() {
                        return invalid_required_action(client, &handle).await;
                    }

                    let outputs = self.run_tools(&calls, translator, sink).await;
                    run.set_state(RunState::Submitted);
                    stream = match open_stream(
                        client.stream_tool_outputs(&handle, &outputs),
                        connection_timeout,
                    )
                    .await
                    {
                        Ok(stream) => stream,
                        Err(termination) => return termination,
                    };
                    run.set_state(RunState::Streaming);
                }
            }
        }
    }

    async fn drive_poll(
        &self,
        client: &dyn ProviderClient,
        request: &RunRequest,
        run: &ActiveRun,
        translator: &mut RunEventTranslator,
        sink: &Arc<dyn RunEventSink>,
    ) -> RunTermination {
        let RunSettings {
            poll_interval,
            connection_timeout,
            ..
        } = self.settings.read().clone();
        run.set_state(RunState::Submitted);

        let handle = match timeout(connection_timeout, client.submit_run(request)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return RunTermination::Failed(provider_failure(&e)),
            Err(_) => return RunTermination::Failed(response_timeout(connection_timeout)),
        };
        translator.set_run_id(&handle.run_id);
        run.set_run_id(Some(&handle.run_id));
        run.set_state(RunState::Polling);

        let mut cancel_deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = run.cancelled(), if cancel_deadline.is_none() => {
                    cancel_deadline = Some(Instant::now() + connection_timeout);
                    send_cancel(client, &handle.thread_id, Some(&handle.run_id)).await;
                    continue;
                }
                _ = sleep_until(cancel_deadline.unwrap_or_else(Instant::now)), if cancel_deadline.is_some() => {
                    warn!(run_id = %handle.run_id, "Run not cancelled in time; declaring it cancelled");
                    return RunTermination::Cancelled;
                }
                _ = sleep(poll_interval) => {}
            }

            let snapshot = match timeout(connection_timeout, client.retrieve_run(&handle)).await {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => return RunTermination::Failed(provider_failure(&e)),
                Err(_) => return RunTermination::Failed(response_timeout(connection_timeout)),
            };
            debug!(run_id = %handle.run_id, status = ?snapshot.status, "Polled run");

            match snapshot.status {
                RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling => {}
                RunStatus::RequiresAction if cancel_deadline.is_some() => {}
                RunStatus::RequiresAction => {
                    let (events, _) = translator.translate(ProviderEvent::RequiresToolOutput {
                        run_id: handle.run_id.clone(),
                        calls: snapshot.required_tool_calls.clone(),
                    });
                    emit(sink, events).await;
                    run.set_state(RunState::RequiresToolOutput);

                    if snapshot.required_tool_calls.is_empty() {
                        return invalid_required_action(client, &handle).await;
                    }
                    let outputs = self
                        .run_tools(&snapshot.required_tool_calls, translator, sink)
                        .await;
                    run.set_state(RunState::Submitted);
                    match timeout(connection_timeout, client.submit_tool_outputs(&handle, &outputs)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return RunTermination::Failed(provider_failure(&e)),
                        Err(_) => return RunTermination::Failed(response_timeout(connection_timeout)),
                    }
                    run.set_state(RunState::Polling);
                }
                RunStatus::Completed => {
                    let messages = match timeout(
                        connection_timeout,
                        client.list_messages(&handle.thread_id, Some(&handle.run_id)),
                    )
                    .await
                    {
                        Ok(Ok(messages)) => messages,
                        Ok(Err(e)) => return RunTermination::Failed(provider_failure(&e)),
                        Err(_) => return RunTermination::Failed(response_timeout(connection_timeout)),
                    };
                    for message in messages
                        .into_iter()
                        .filter(|m| m.role == crate::models::MessageRole::Assistant)
                    {
                        let (events, _) = translator.translate(ProviderEvent::MessageCompleted(message));
                        emit(sink, events).await;
                    }
                    return RunTermination::Completed;
                }
                RunStatus::Failed => {
                    let (code, message) = snapshot
                        .last_error
                        .unwrap_or_else(|| ("run_failed".to_string(), "Run failed".to_string()));
                    return RunTermination::Failed(RunFailure::provider(code, message));
                }
                RunStatus::Incomplete => {
                    return RunTermination::Failed(RunFailure::provider(
                        "incomplete",
                        "Run ended before completion",
                    ));
                }
                RunStatus::Cancelled | RunStatus::Expired => return RunTermination::Cancelled,
            }
        }
    }

    /// One-shot completion; the reply is stored in the thread tagged with
    /// the assistant's name.
    async fn drive_chat(
        &self,
        client: &dyn ProviderClient,
        config: &AssistantConfig,
        context: &RunContext,
        run: &ActiveRun,
        translator: &mut RunEventTranslator,
        sink: &Arc<dyn RunEventSink>,
    ) -> RunTermination {
        let connection_timeout = self.settings.read().connection_timeout;
        run.set_state(RunState::Submitted);

        let completion = client.complete(&config.model, &config.instructions, &context.user_request);
        let reply = tokio::select! {
            biased;
            _ = run.cancelled() => return RunTermination::Cancelled,
            reply = timeout(connection_timeout, completion) => reply,
        };
        let text = match reply {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return RunTermination::Failed(provider_failure(&e)),
            Err(_) => return RunTermination::Failed(response_timeout(connection_timeout)),
        };

        run.set_state(RunState::Streaming);
        let (events, _) = translator.translate(ProviderEvent::TextDone { text: text.clone() });
        emit(sink, events).await;

        let message = NewMessage {
            content: text,
            metadata: HashMap::from([(CHAT_ASSISTANT_METADATA.to_string(), config.name.clone())]),
            ..Default::default()
        };
        match client.create_message(&context.thread_id, &message).await {
            Ok(()) => RunTermination::Completed,
            Err(e) => RunTermination::Failed(provider_failure(&e)),
        }
    }

    async fn run_tools(
        &self,
        calls: &[ToolCall],
        translator: &RunEventTranslator,
        sink: &Arc<dyn RunEventSink>,
    ) -> Vec<ToolOutput> {
        let output_folder = self.config.read().output_folder_path.clone();
        run_tool_batch(&self.functions, output_folder, calls, translator, sink).await
    }

    // ─── realtime ───

    pub fn connection_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    /// Open the duplex session bound to a thread. Reconnects when bound to
    /// another thread.
    pub async fn connect(
        &self,
        thread_name: &str,
        thread_id: &str,
        sink: Arc<dyn RunEventSink>,
    ) -> ParleyResult<()> {
        let config = self.config();
        let connector = self.registry.realtime_connector(config.client_type)?;
        let client = self.registry.get(config.client_type)?;
        self.realtime
            .connect(
                &config,
                thread_name,
                thread_id,
                connector,
                client,
                self.functions.clone(),
                sink,
            )
            .await
    }

    pub async fn disconnect(&self, sink: Arc<dyn RunEventSink>) {
        self.realtime.disconnect(&self.name(), sink).await;
    }

    /// Send `text` on the realtime session; an active response is
    /// cancelled first.
    pub async fn generate_response(&self, text: &str) -> ParleyResult<()> {
        self.realtime.generate_response(&self.name(), text).await
    }
}

pub(crate) async fn emit(sink: &Arc<dyn RunEventSink>, events: Vec<RunEvent>) {
    for event in events {
        sink.on_run_event(event).await;
    }
}

/// Execute a tool call batch and report every resolved call.
pub(crate) async fn run_tool_batch(
    functions: &Arc<FunctionRegistry>,
    output_folder: Option<std::path::PathBuf>,
    calls: &[ToolCall],
    translator: &RunEventTranslator,
    sink: &Arc<dyn RunEventSink>,
) -> Vec<ToolOutput> {
    let coordinator = ToolInvocationCoordinator::new(functions.clone(), output_folder);
    let results = coordinator.execute_batch(calls).await;

    for result in results.iter().filter(|r| r.resolved) {
        let event = translator.function_call_processed(
            &result.call.name,
            &result.call.arguments,
            &result.output,
        );
        sink.on_run_event(event).await;
    }
    ToolInvocationCoordinator::outputs(&results)
}

async fn open_stream(
    opening: impl std::future::Future<Output = Result<EventStream, ProviderError>>,
    connection_timeout: Duration,
) -> Result<EventStream, RunTermination> {
    match timeout(connection_timeout, opening).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(RunTermination::Failed(provider_failure(&e))),
        Err(_) => Err(RunTermination::Failed(response_timeout(connection_timeout))),
    }
}

async fn send_cancel(client: &dyn ProviderClient, thread_id: &str, run_id: Option<&str>) {
    let Some(run_id) = run_id else {
        debug!(thread_id = %thread_id, "Cancel deferred until the run id is known");
        return;
    };
    let handle = RunHandle {
        thread_id: thread_id.to_string(),
        run_id: run_id.to_string(),
    };
    match client.cancel_run(&handle).await {
        Ok(()) => info!(run_id = %run_id, "Cancel requested"),
        Err(e) => warn!(run_id = %run_id, error = %e, "Cancel request failed"),
    }
}

async fn invalid_required_action(client: &dyn ProviderClient, handle: &RunHandle) -> RunTermination {
    warn!(run_id = %handle.run_id, "Required action without tool calls");
    if let Err(e) = client.cancel_run(handle).await {
        warn!(run_id = %handle.run_id, error = %e, "Cancel request failed");
    }
    RunTermination::Failed(RunFailure::provider(
        "invalid_required_action",
        "The run requested tool output without any tool calls",
    ))
}

fn provider_failure(error: &ProviderError) -> RunFailure {
    match error {
        ProviderError::Timeout => RunFailure::timeout(error.message()),
        _ => RunFailure::provider(error.code(), error.message()),
    }
}

fn response_timeout(after: Duration) -> RunFailure {
    RunFailure::timeout(format!(
        "No response from the provider within {:.1}s",
        after.as_secs_f64()
    ))
}
