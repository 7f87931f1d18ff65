use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::run_controller::{RunEventSink, emit, run_tool_batch};
use crate::error::{ParleyError, ParleyResult};
use crate::functions::FunctionRegistry;
use crate::models::{ProcessingGuard, RunFailure, RunTermination};
use crate::providers::{
    ConnectionState, EventStream, NewMessage, ProviderClient, ProviderEvent, RealtimeConnector,
    RealtimeSession, RealtimeSessionConfig,
};
use crate::services::{CHAT_ASSISTANT_METADATA, RunEventTranslator, TranslatorStep};
use crate::settings::models::AssistantConfig;

const RUN_ID_PREFIX: &str = "realtime_";
/// How long `close` waits for the receive loop to wind down before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ResponseState {
    active: AtomicBool,
    last_request: Mutex<String>,
}

struct Connection {
    session: Arc<dyn RealtimeSession>,
    thread_id: String,
    responses: Arc<ResponseState>,
    shutdown: oneshot::Sender<()>,
    receiver: JoinHandle<()>,
}

/// The duplex session of a realtime assistant, bound to one thread.
pub(crate) struct RealtimeLink {
    state: Arc<Mutex<ConnectionState>>,
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl RealtimeLink {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn connect(
        &self,
        config: &AssistantConfig,
        thread_name: &str,
        thread_id: &str,
        connector: Arc<dyn RealtimeConnector>,
        client: Arc<dyn ProviderClient>,
        functions: Arc<FunctionRegistry>,
        sink: Arc<dyn RunEventSink>,
    ) -> ParleyResult<()> {
        let mut connection = self.connection.lock().await;
        let bound_here = connection
            .as_ref()
            .is_some_and(|existing| existing.thread_id == thread_id);
        if bound_here && self.state() == ConnectionState::Connected {
            return Ok(());
        }
        if let Some(existing) = connection.take() {
            close(existing).await;
            mark_disconnected(&self.state, &config.name, &sink);
        }

        *self.state.lock() = ConnectionState::Connecting;
        sink.connection_changed(&config.name, ConnectionState::Connecting, Some(thread_name));

        let session_config = RealtimeSessionConfig {
            model: config.model.clone(),
            instructions: config.instructions.clone(),
            functions: functions.definitions(&config.selected_functions),
        };
        let (session, events) = match connector.connect(&session_config).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(assistant = %config.name, error = %e, "Realtime connection failed");
                mark_disconnected(&self.state, &config.name, &sink);
                return Err(e.into());
            }
        };

        *self.state.lock() = ConnectionState::Connected;
        sink.connection_changed(&config.name, ConnectionState::Connected, Some(thread_name));
        info!(assistant = %config.name, thread = %thread_name, "Realtime assistant connected");

        let responses = Arc::new(ResponseState::default());
        let receiver = ResponseReceiver {
            assistant: config.name.clone(),
            thread_name: thread_name.to_string(),
            thread_id: thread_id.to_string(),
            output_folder: config.output_folder_path.clone(),
            session: session.clone(),
            client,
            functions,
            sink,
            responses: responses.clone(),
            state: self.state.clone(),
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let receiver = tokio::spawn(receiver.run(events, shutdown_rx));

        *connection = Some(Connection {
            session,
            thread_id: thread_id.to_string(),
            responses,
            shutdown,
            receiver,
        });
        Ok(())
    }

    pub(crate) async fn disconnect(&self, assistant: &str, sink: Arc<dyn RunEventSink>) {
        if let Some(existing) = self.connection.lock().await.take() {
            close(existing).await;
            info!(assistant = %assistant, "Realtime assistant disconnected");
        }
        mark_disconnected(&self.state, assistant, &sink);
    }

    pub(crate) async fn generate_response(&self, assistant: &str, text: &str) -> ParleyResult<()> {
        let not_connected = || ParleyError::NotConnected {
            assistant: assistant.to_string(),
        };
        if self.state() != ConnectionState::Connected {
            return Err(not_connected());
        }
        let connection = self.connection.lock().await;
        let connection = connection.as_ref().ok_or_else(not_connected)?;

        if connection.responses.active.swap(true, Ordering::SeqCst) {
            debug!(assistant = %assistant, "Cancelling active realtime response");
            if let Err(e) = connection.session.cancel_response().await {
                warn!(assistant = %assistant, error = %e, "Failed to cancel realtime response");
            }
        }
        *connection.responses.last_request.lock() = text.to_string();
        connection.session.send_text(text).await.map_err(ParleyError::from)
    }
}

/// Stop the receive loop, letting it cancel the response in flight, then
/// close the session.
async fn close(connection: Connection) {
    let Connection {
        session,
        shutdown,
        mut receiver,
        ..
    } = connection;
    let _ = shutdown.send(());
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut receiver).await.is_err() {
        warn!("Realtime receive loop did not stop in time, aborting it");
        receiver.abort();
    }
    if let Err(e) = session.close().await {
        debug!(error = %e, "Realtime session close failed");
    }
}

/// Publish `Disconnected` unless the link already was.
fn mark_disconnected(state: &Mutex<ConnectionState>, assistant: &str, sink: &Arc<dyn RunEventSink>) {
    let previous = std::mem::replace(&mut *state.lock(), ConnectionState::Disconnected);
    if previous != ConnectionState::Disconnected {
        sink.connection_changed(assistant, ConnectionState::Disconnected, None);
    }
}

/// One response of the session, reported as its own run.
struct ResponseRun {
    translator: RunEventTranslator,
    reply: String,
    _processing: ProcessingGuard,
}

struct ResponseReceiver {
    assistant: String,
    thread_name: String,
    thread_id: String,
    output_folder: Option<PathBuf>,
    session: Arc<dyn RealtimeSession>,
    client: Arc<dyn ProviderClient>,
    functions: Arc<FunctionRegistry>,
    sink: Arc<dyn RunEventSink>,
    responses: Arc<ResponseState>,
    state: Arc<Mutex<ConnectionState>>,
}

impl ResponseReceiver {
    async fn run(self, mut events: EventStream, mut shutdown: oneshot::Receiver<()>) {
        let mut current: Option<ResponseRun> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    if let Some(response) = current.take() {
                        self.complete(response, RunTermination::Cancelled).await;
                    }
                    debug!(assistant = %self.assistant, "Realtime receive loop stopped");
                    return;
                }
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let ProviderEvent::RunCreated { run_id } = &event {
                if let Some(previous) = current.take() {
                    self.complete(previous, RunTermination::Completed).await;
                }
                let mut response = self.begin();
                response.translator.set_run_id(format!("{RUN_ID_PREFIX}{run_id}"));
                current = Some(response);
                continue;
            }

            let mut response = current.take().unwrap_or_else(|| self.begin());
            match &event {
                ProviderEvent::TextDelta { text } => response.reply.push_str(text),
                ProviderEvent::TextDone { text } => response.reply = text.clone(),
                _ => {}
            }

            let (signals, step) = response.translator.translate(event);
            emit(&self.sink, signals).await;

            match step {
                TranslatorStep::Continue => current = Some(response),
                TranslatorStep::ToolCallsRequired { calls, .. } => {
                    let outputs = run_tool_batch(
                        &self.functions,
                        self.output_folder.clone(),
                        &calls,
                        &response.translator,
                        &self.sink,
                    )
                    .await;
                    let termination = match self.session.submit_tool_outputs(&outputs).await {
                        Ok(()) => RunTermination::Completed,
                        Err(e) => RunTermination::Failed(RunFailure::provider(e.code(), e.message())),
                    };
                    self.complete(response, termination).await;
                }
                TranslatorStep::Terminal(termination) => self.complete(response, termination).await,
            }
        }

        if let Some(response) = current.take() {
            let failure = RunFailure::exception(
                "connection_closed",
                "The realtime session closed during a response",
            );
            self.complete(response, RunTermination::Failed(failure)).await;
        }
        debug!(assistant = %self.assistant, "Realtime receive loop ended");
        mark_disconnected(&self.state, &self.assistant, &self.sink);
    }

    fn begin(&self) -> ResponseRun {
        let request = self.responses.last_request.lock().clone();
        ResponseRun {
            translator: RunEventTranslator::new(&self.assistant, &self.thread_name, request),
            reply: String::new(),
            _processing: self.sink.begin_processing(&self.assistant, false),
        }
    }

    /// Store the reply in the thread, then emit the terminal signals.
    async fn complete(&self, mut response: ResponseRun, termination: RunTermination) {
        if termination == RunTermination::Completed && !response.reply.is_empty() {
            let message = NewMessage {
                content: std::mem::take(&mut response.reply),
                metadata: HashMap::from([(
                    CHAT_ASSISTANT_METADATA.to_string(),
                    self.assistant.clone(),
                )]),
                ..Default::default()
            };
            if let Err(e) = self.client.create_message(&self.thread_id, &message).await {
                warn!(assistant = %self.assistant, error = %e, "Failed to store realtime reply");
            }
        }

        let signals = response.translator.finish(&termination);
        emit(&self.sink, signals).await;
        self.responses.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionDefinition;
    use crate::models::{AppEvent, RunEventKind, RunState, ViewEvent};
    use crate::providers::{ProviderResult, ToolCall, ToolOutput};
    use crate::test_helpers::{ProviderCall, RecordingSink, ScriptedProvider, count_kind, run_events};
    use async_trait::async_trait;
    use futures::channel::mpsc::{UnboundedSender, unbounded};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSession {
        sent: Mutex<Vec<String>>,
        outputs: Mutex<Vec<ToolOutput>>,
        cancels: Mutex<usize>,
    }

    #[async_trait]
    impl RealtimeSession for FakeSession {
        async fn send_text(&self, text: &str) -> ProviderResult<()> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        async fn cancel_response(&self) -> ProviderResult<()> {
            *self.cancels.lock() += 1;
            Ok(())
        }

        async fn submit_tool_outputs(&self, outputs: &[ToolOutput]) -> ProviderResult<()> {
            self.outputs.lock().extend_from_slice(outputs);
            Ok(())
        }

        async fn close(&self) -> ProviderResult<()> {
            Ok(())
        }
    }

    struct FakeConnector {
        session: Arc<FakeSession>,
        events: Mutex<Option<futures::channel::mpsc::UnboundedReceiver<ProviderEvent>>>,
    }

    #[async_trait]
    impl RealtimeConnector for FakeConnector {
        async fn connect(
            &self,
            _config: &RealtimeSessionConfig,
        ) -> ProviderResult<(Arc<dyn RealtimeSession>, EventStream)> {
            let events = self
                .events
                .lock()
                .take()
                .ok_or_else(|| crate::providers::ProviderError::Http("refused".to_string()))?;
            Ok((self.session.clone(), Box::pin(events)))
        }
    }

    struct Fixture {
        link: RealtimeLink,
        session: Arc<FakeSession>,
        connector: Arc<FakeConnector>,
        provider: Arc<ScriptedProvider>,
        functions: Arc<FunctionRegistry>,
        sink: Arc<RecordingSink>,
        server: UnboundedSender<ProviderEvent>,
    }

    fn fixture() -> Fixture {
        let (server, events) = unbounded();
        let session = Arc::new(FakeSession::default());
        let functions = FunctionRegistry::new();
        functions.register_fn(
            FunctionDefinition {
                name: "lookup".to_string(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            },
            |_| Ok("42".to_string()),
        );
        Fixture {
            link: RealtimeLink::new(),
            connector: Arc::new(FakeConnector {
                session: session.clone(),
                events: Mutex::new(Some(events)),
            }),
            session,
            provider: ScriptedProvider::shared(),
            functions: Arc::new(functions),
            sink: RecordingSink::shared(),
            server,
        }
    }

    fn config() -> AssistantConfig {
        AssistantConfig::new("Voice", "gpt-4o-realtime-preview")
    }

    async fn connect(f: &Fixture) {
        f.link
            .connect(
                &config(),
                "Thread 1",
                "thread_1",
                f.connector.clone(),
                f.provider.clone(),
                f.functions.clone(),
                f.sink.clone(),
            )
            .await
            .unwrap();
    }

    async fn wait_for_ended(sink: &RecordingSink, count: usize) {
        for _ in 0..200 {
            let ended = run_events(&sink.events())
                .iter()
                .filter(|e| matches!(e.kind, RunEventKind::Ended { .. }))
                .count();
            if ended >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run did not end");
    }

    #[tokio::test]
    async fn test_response_is_reported_as_a_run_and_stored() {
        let f = fixture();
        connect(&f).await;
        assert_eq!(f.link.state(), ConnectionState::Connected);

        f.link.generate_response("Voice", "Hello").await.unwrap();
        assert_eq!(*f.session.sent.lock(), vec!["Hello".to_string()]);

        for event in [
            ProviderEvent::RunCreated {
                run_id: "resp_1".to_string(),
            },
            ProviderEvent::TextDelta {
                text: "Hel".to_string(),
            },
            ProviderEvent::TextDelta {
                text: "lo!".to_string(),
            },
            ProviderEvent::RunEnd,
        ] {
            f.server.unbounded_send(event).unwrap();
        }
        wait_for_ended(&f.sink, 1).await;

        let runs = run_events(&f.sink.events());
        assert!(runs.iter().all(|e| e.run_id.as_deref() == Some("realtime_resp_1")));
        assert!(matches!(&runs[0].kind, RunEventKind::Started { user_request } if user_request == "Hello"));
        assert_eq!(
            runs.last().map(|e| &e.kind),
            Some(&RunEventKind::Ended {
                state: RunState::Completed
            })
        );
        assert!(f.provider.calls().iter().any(|c| matches!(
            c,
            ProviderCall::CreateMessage { thread_id, content, .. }
                if thread_id == "thread_1" && content == "Hello!"
        )));
    }

    #[tokio::test]
    async fn test_tool_calls_are_answered_on_the_session() {
        let f = fixture();
        connect(&f).await;
        f.link.generate_response("Voice", "What is it?").await.unwrap();

        f.server
            .unbounded_send(ProviderEvent::RunCreated {
                run_id: "resp_1".to_string(),
            })
            .unwrap();
        f.server
            .unbounded_send(ProviderEvent::RequiresToolOutput {
                run_id: "resp_1".to_string(),
                calls: vec![ToolCall {
                    call_id: "call_1".to_string(),
                    name: "lookup".to_string(),
                    arguments: "{}".to_string(),
                }],
            })
            .unwrap();
        wait_for_ended(&f.sink, 1).await;

        let outputs = f.session.outputs.lock().clone();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].output, "42");
        let runs = run_events(&f.sink.events());
        assert!(
            runs.iter()
                .any(|e| matches!(e.kind, RunEventKind::FunctionCallProcessed { .. }))
        );
    }

    #[tokio::test]
    async fn test_disconnect_cancels_response_in_flight() {
        let f = fixture();
        connect(&f).await;
        f.link.generate_response("Voice", "Tell me a story").await.unwrap();

        f.server
            .unbounded_send(ProviderEvent::RunCreated {
                run_id: "resp_1".to_string(),
            })
            .unwrap();
        f.server
            .unbounded_send(ProviderEvent::TextDelta {
                text: "Once upon".to_string(),
            })
            .unwrap();
        for _ in 0..200 {
            if count_kind(&run_events(&f.sink.events()), |k| {
                matches!(k, RunEventKind::Started { .. })
            }) == 1
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        f.link.disconnect("Voice", f.sink.clone()).await;

        let runs = run_events(&f.sink.events());
        assert_eq!(count_kind(&runs, |k| matches!(k, RunEventKind::Started { .. })), 1);
        assert_eq!(count_kind(&runs, |k| matches!(k, RunEventKind::Cancelled)), 1);
        assert_eq!(
            runs.last().map(|e| &e.kind),
            Some(&RunEventKind::Ended {
                state: RunState::Cancelled
            })
        );
        // A cancelled reply is not stored.
        assert!(
            !f.provider
                .calls()
                .iter()
                .any(|c| matches!(c, ProviderCall::CreateMessage { .. }))
        );
        assert_eq!(f.link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_new_request_cancels_active_response() {
        let f = fixture();
        connect(&f).await;
        f.link.generate_response("Voice", "first").await.unwrap();
        f.link.generate_response("Voice", "second").await.unwrap();

        assert_eq!(*f.session.cancels.lock(), 1);
        assert_eq!(f.session.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_socket_close_disconnects_once() {
        let f = fixture();
        connect(&f).await;
        drop(f.server);

        for _ in 0..200 {
            if f.link.state() == ConnectionState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.link.state(), ConnectionState::Disconnected);

        f.link.disconnect("Voice", f.sink.clone()).await;
        let disconnected = f
            .sink
            .events()
            .iter()
            .filter(|e| matches!(e, AppEvent::View(ViewEvent::Disconnected { .. })))
            .count();
        assert_eq!(disconnected, 1);

        let result = f.link.generate_response("Voice", "anyone?").await;
        assert!(matches!(result, Err(ParleyError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_failed_connect_reports_disconnected() {
        let f = fixture();
        f.connector.events.lock().take();

        let result = f
            .link
            .connect(
                &config(),
                "Thread 1",
                "thread_1",
                f.connector.clone(),
                f.provider.clone(),
                f.functions.clone(),
                f.sink.clone(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(f.link.state(), ConnectionState::Disconnected);
    }
}
