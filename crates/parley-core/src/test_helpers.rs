//! Shared fixtures: a scripted in-memory provider and event recorders.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::controllers::RunEventSink;
use crate::models::{
    AppEvent, MessageRole, ProcessingGuard, ProcessingStates, RunEvent, RunEventKind, ViewEvent,
};
use crate::providers::{
    AssistantDefinition, ConnectionState, EventStream, FileInfo, NewMessage, ProviderClient, ProviderError,
    ProviderEvent, ProviderResult, RemoteContent, RemoteMessage, RunHandle, RunRequest,
    RunSnapshot, RunStatus, ToolCall, ToolOutput,
};
use crate::services::EventBus;
use crate::settings::models::ClientType;

/// One step of a scripted event stream.
#[derive(Clone, Debug)]
pub(crate) enum ScriptStep {
    Event(ProviderEvent),
    /// Block until `cancel_run` is called, then yield `Cancelled`.
    WaitForCancel,
    /// Block forever without yielding.
    Stall,
    Delay(Duration),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ProviderCall {
    CreateAssistant(String),
    CreateThread(String),
    DeleteThread(String),
    CreateMessage {
        thread_id: String,
        content: String,
        attachment_ids: Vec<String>,
        image_ids: Vec<String>,
    },
    ListMessages {
        thread_id: String,
        run_id: Option<String>,
    },
    UploadFile(PathBuf),
    DeleteFile(String),
    DownloadFile(String),
    SubmitRun(String),
    StreamRun(String),
    RetrieveRun(String),
    SubmitToolOutputs(Vec<ToolOutput>),
    StreamToolOutputs(Vec<ToolOutput>),
    CancelRun(String),
    Complete(String),
}

pub(crate) struct ScriptedProvider {
    client_type: ClientType,
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    snapshots: Mutex<VecDeque<RunSnapshot>>,
    messages: Mutex<HashMap<String, Vec<RemoteMessage>>>,
    files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    calls: Mutex<Vec<ProviderCall>>,
    counter: AtomicUsize,
    cancelled: watch::Sender<bool>,
    completion: Mutex<String>,
    submit_error: Mutex<Option<ProviderError>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self {
            client_type: ClientType::OpenAi,
            scripts: Mutex::new(VecDeque::new()),
            snapshots: Mutex::new(VecDeque::new()),
            messages: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            cancelled: watch::Sender::new(false),
            completion: Mutex::new("Generated Title".to_string()),
            submit_error: Mutex::new(None),
        }
    }

    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Queue the event stream returned by the next `stream_run` or
    /// `stream_tool_outputs` call.
    pub(crate) fn push_script(&self, steps: Vec<ScriptStep>) {
        self.scripts.lock().push_back(steps);
    }

    pub(crate) fn push_events(&self, events: Vec<ProviderEvent>) {
        self.push_script(events.into_iter().map(ScriptStep::Event).collect());
    }

    /// Queue the snapshot returned by the next `retrieve_run` call.
    pub(crate) fn push_snapshot(&self, status: RunStatus, calls: Vec<ToolCall>) {
        let run_id = format!("run_{}", self.counter.load(Ordering::SeqCst));
        self.snapshots.lock().push_back(RunSnapshot {
            run_id,
            status,
            required_tool_calls: calls,
            last_error: None,
        });
    }

    pub(crate) fn push_message(&self, thread_id: &str, message: RemoteMessage) {
        self.messages
            .lock()
            .entry(thread_id.to_string())
            .or_default()
            .push(message);
    }

    pub(crate) fn add_file(&self, file_id: &str, filename: &str, bytes: &[u8]) {
        self.files
            .lock()
            .insert(file_id.to_string(), (filename.to_string(), bytes.to_vec()));
    }

    pub(crate) fn set_completion(&self, text: &str) {
        *self.completion.lock() = text.to_string();
    }

    pub(crate) fn fail_next_submit(&self, error: ProviderError) {
        *self.submit_error.lock() = Some(error);
    }

    pub(crate) fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn count_calls(&self, matches: impl Fn(&ProviderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_stream(&self, run_id: &str) -> EventStream {
        let steps = self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![
                ScriptStep::Event(ProviderEvent::RunCreated {
                    run_id: run_id.to_string(),
                }),
                ScriptStep::Event(ProviderEvent::RunEnd),
            ]
        });
        let mut cancelled = self.cancelled.subscribe();

        Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Event(event) => yield event,
                    ScriptStep::WaitForCancel => {
                        let _ = cancelled.wait_for(|c| *c).await;
                        yield ProviderEvent::Cancelled;
                        return;
                    }
                    ScriptStep::Stall => futures::future::pending::<()>().await,
                    ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                }
            }
        })
    }
}

pub(crate) fn assistant_text(id: &str, assistant_id: &str, run_id: &str, text: &str) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        role: MessageRole::Assistant,
        assistant_id: Some(assistant_id.to_string()),
        run_id: Some(run_id.to_string()),
        metadata: HashMap::new(),
        content: vec![RemoteContent::Text {
            value: text.to_string(),
            annotations: Vec::new(),
        }],
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn client_type(&self) -> ClientType {
        self.client_type
    }

    async fn create_assistant(&self, definition: &AssistantDefinition) -> ProviderResult<String> {
        self.record(ProviderCall::CreateAssistant(definition.name.clone()));
        Ok(self.next_id("asst"))
    }

    async fn create_thread(&self) -> ProviderResult<String> {
        let id = self.next_id("thread");
        self.record(ProviderCall::CreateThread(id.clone()));
        Ok(id)
    }

    async fn delete_thread(&self, thread_id: &str) -> ProviderResult<()> {
        self.record(ProviderCall::DeleteThread(thread_id.to_string()));
        self.messages.lock().remove(thread_id);
        Ok(())
    }

    async fn create_message(&self, thread_id: &str, message: &NewMessage) -> ProviderResult<()> {
        self.record(ProviderCall::CreateMessage {
            thread_id: thread_id.to_string(),
            content: message.content.clone(),
            attachment_ids: message.attachments.iter().map(|a| a.file_id.clone()).collect(),
            image_ids: message.image_file_ids.clone(),
        });
        let remote = RemoteMessage {
            id: self.next_id("msg"),
            role: MessageRole::User,
            assistant_id: None,
            run_id: None,
            metadata: message.metadata.clone(),
            content: vec![RemoteContent::Text {
                value: message.content.clone(),
                annotations: Vec::new(),
            }],
        };
        self.push_message(thread_id, remote);
        Ok(())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
    ) -> ProviderResult<Vec<RemoteMessage>> {
        self.record(ProviderCall::ListMessages {
            thread_id: thread_id.to_string(),
            run_id: run_id.map(str::to_string),
        });
        let messages = self.messages.lock().get(thread_id).cloned().unwrap_or_default();
        Ok(messages
            .into_iter()
            .filter(|m| run_id.is_none() || m.run_id.as_deref() == run_id)
            .collect())
    }

    async fn upload_file(&self, path: &Path) -> ProviderResult<String> {
        self.record(ProviderCall::UploadFile(path.to_path_buf()));
        let id = self.next_id("file");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.files.lock().insert(id.clone(), (name, Vec::new()));
        Ok(id)
    }

    async fn delete_file(&self, file_id: &str) -> ProviderResult<()> {
        self.record(ProviderCall::DeleteFile(file_id.to_string()));
        self.files.lock().remove(file_id);
        Ok(())
    }

    async fn file_info(&self, file_id: &str) -> ProviderResult<FileInfo> {
        let filename = self
            .files
            .lock()
            .get(file_id)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                code: "not_found".to_string(),
                message: format!("No file {file_id}"),
            })?;
        Ok(FileInfo {
            id: file_id.to_string(),
            filename,
        })
    }

    async fn download_file(&self, file_id: &str) -> ProviderResult<Vec<u8>> {
        self.record(ProviderCall::DownloadFile(file_id.to_string()));
        self.files
            .lock()
            .get(file_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ProviderError::File(format!("No file {file_id}")))
    }

    async fn submit_run(&self, request: &RunRequest) -> ProviderResult<RunHandle> {
        self.record(ProviderCall::SubmitRun(request.thread_id.clone()));
        if let Some(error) = self.submit_error.lock().take() {
            return Err(error);
        }
        Ok(RunHandle {
            thread_id: request.thread_id.clone(),
            run_id: self.next_id("run"),
        })
    }

    async fn stream_run(&self, request: &RunRequest) -> ProviderResult<EventStream> {
        self.record(ProviderCall::StreamRun(request.thread_id.clone()));
        if let Some(error) = self.submit_error.lock().take() {
            return Err(error);
        }
        let run_id = self.next_id("run");
        Ok(self.next_stream(&run_id))
    }

    async fn retrieve_run(&self, handle: &RunHandle) -> ProviderResult<RunSnapshot> {
        self.record(ProviderCall::RetrieveRun(handle.run_id.clone()));
        let cancelled = *self.cancelled.borrow();
        let snapshot = self.snapshots.lock().pop_front();
        Ok(match snapshot {
            Some(snapshot) => RunSnapshot {
                run_id: handle.run_id.clone(),
                ..snapshot
            },
            None => RunSnapshot {
                run_id: handle.run_id.clone(),
                status: if cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                },
                required_tool_calls: Vec::new(),
                last_error: None,
            },
        })
    }

    async fn submit_tool_outputs(
        &self,
        _handle: &RunHandle,
        outputs: &[ToolOutput],
    ) -> ProviderResult<()> {
        self.record(ProviderCall::SubmitToolOutputs(outputs.to_vec()));
        Ok(())
    }

    async fn stream_tool_outputs(
        &self,
        handle: &RunHandle,
        outputs: &[ToolOutput],
    ) -> ProviderResult<EventStream> {
        self.record(ProviderCall::StreamToolOutputs(outputs.to_vec()));
        Ok(self.next_stream(&handle.run_id))
    }

    async fn cancel_run(&self, handle: &RunHandle) -> ProviderResult<()> {
        self.record(ProviderCall::CancelRun(handle.run_id.clone()));
        self.cancelled.send_replace(true);
        Ok(())
    }

    async fn complete(&self, _model: &str, _system: &str, prompt: &str) -> ProviderResult<String> {
        self.record(ProviderCall::Complete(prompt.to_string()));
        Ok(self.completion.lock().clone())
    }
}

/// Collects every event published on a bus.
pub(crate) fn recording_bus() -> (Arc<EventBus>, Arc<Mutex<Vec<AppEvent>>>) {
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe_all(move |e| sink.lock().push(e.clone()));
    (bus, events)
}

pub(crate) fn run_events(events: &[AppEvent]) -> Vec<RunEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Run(run) => Some(run.clone()),
            AppEvent::View(_) => None,
        })
        .collect()
}

pub(crate) fn count_kind(events: &[RunEvent], matches: impl Fn(&RunEventKind) -> bool) -> usize {
    events.iter().filter(|e| matches(&e.kind)).count()
}

/// Run sink that publishes everything on a recording bus.
pub(crate) struct RecordingSink {
    bus: Arc<EventBus>,
    processing: ProcessingStates,
    events: Arc<Mutex<Vec<AppEvent>>>,
}

impl RecordingSink {
    pub(crate) fn shared() -> Arc<Self> {
        let (bus, events) = recording_bus();
        Arc::new(Self {
            processing: ProcessingStates::new(bus.clone()),
            bus,
            events,
        })
    }

    pub(crate) fn events(&self) -> Vec<AppEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl RunEventSink for RecordingSink {
    async fn on_run_event(&self, event: RunEvent) {
        self.bus.publish(AppEvent::Run(event));
    }

    fn begin_processing(&self, assistant: &str, scheduled: bool) -> ProcessingGuard {
        self.processing.begin(assistant, scheduled)
    }

    fn connection_changed(&self, assistant: &str, state: ConnectionState, thread: Option<&str>) {
        let event = match state {
            ConnectionState::Connected => ViewEvent::Connected {
                assistant: assistant.to_string(),
                thread: thread.unwrap_or_default().to_string(),
            },
            ConnectionState::Disconnected => ViewEvent::Disconnected {
                assistant: assistant.to_string(),
            },
            ConnectionState::Connecting => return,
        };
        self.bus.publish(AppEvent::View(event));
    }
}
