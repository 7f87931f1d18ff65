use std::collections::HashMap;

use chrono::Local;

use crate::models::{
    ConversationMessage, MessageRole, RunEvent, RunEventKind, RunFailure, RunTermination,
    RunUpdateStatus, UpdatePayload,
};
use crate::providers::{ProviderEvent, ToolCall};

/// What the controller has to do after an event was translated.
#[derive(Debug, PartialEq)]
pub enum TranslatorStep {
    Continue,
    /// The run is paused on a tool call batch.
    ToolCallsRequired { run_id: String, calls: Vec<ToolCall> },
    Terminal(RunTermination),
}

/// Turns the provider events of one run into lifecycle signals.
///
/// `Started` is emitted once, on the first content-bearing event. The
/// terminal `Failed`/`Cancelled` + `Ended` pair is emitted once by
/// [`finish`](Self::finish), however often it is called.
pub struct RunEventTranslator {
    assistant: String,
    thread: String,
    user_request: String,
    run_id: Option<String>,
    started: bool,
    first_chunk_sent: bool,
    finished: bool,
}

impl RunEventTranslator {
    pub fn new(
        assistant: impl Into<String>,
        thread: impl Into<String>,
        user_request: impl Into<String>,
    ) -> Self {
        Self {
            assistant: assistant.into(),
            thread: thread.into(),
            user_request: user_request.into(),
            run_id: None,
            started: false,
            first_chunk_sent: false,
            finished: false,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = Some(run_id.into());
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn event(&self, kind: RunEventKind) -> RunEvent {
        RunEvent {
            assistant: self.assistant.clone(),
            run_id: self.run_id.clone(),
            thread: self.thread.clone(),
            timestamp: Local::now(),
            kind,
        }
    }

    fn ensure_started(&mut self, events: &mut Vec<RunEvent>) {
        if !self.started {
            self.started = true;
            events.push(self.event(RunEventKind::Started {
                user_request: self.user_request.clone(),
            }));
        }
    }

    fn update(&self, status: RunUpdateStatus, is_first_chunk: bool, payload: UpdatePayload) -> RunEvent {
        self.event(RunEventKind::Updated {
            status,
            is_first_chunk,
            payload: Some(payload),
        })
    }

    pub fn translate(&mut self, event: ProviderEvent) -> (Vec<RunEvent>, TranslatorStep) {
        let mut events = Vec::new();
        if self.finished {
            return (events, TranslatorStep::Continue);
        }

        let step = match event {
            ProviderEvent::RunCreated { run_id } => {
                self.run_id = Some(run_id);
                TranslatorStep::Continue
            }
            ProviderEvent::MessageCreated { .. } => TranslatorStep::Continue,
            ProviderEvent::TextDelta { text } => {
                self.ensure_started(&mut events);
                let is_first_chunk = !self.first_chunk_sent;
                self.first_chunk_sent = true;
                events.push(self.update(
                    RunUpdateStatus::Streaming,
                    is_first_chunk,
                    UpdatePayload::Text(text),
                ));
                TranslatorStep::Continue
            }
            ProviderEvent::TextDone { text } => {
                self.ensure_started(&mut events);
                events.push(self.update(RunUpdateStatus::Completed, false, UpdatePayload::Text(text)));
                TranslatorStep::Continue
            }
            ProviderEvent::MessageCompleted(remote) => {
                self.ensure_started(&mut events);
                let message = ConversationMessage::from_remote(
                    &remote,
                    MessageRole::Assistant,
                    self.assistant.clone(),
                    &HashMap::new(),
                );
                events.push(self.update(
                    RunUpdateStatus::InProgress,
                    false,
                    UpdatePayload::Message(message),
                ));
                TranslatorStep::Continue
            }
            ProviderEvent::ToolCallDelta { .. } | ProviderEvent::ToolCallDone { .. } => {
                self.ensure_started(&mut events);
                TranslatorStep::Continue
            }
            ProviderEvent::RequiresToolOutput { run_id, calls } => {
                self.ensure_started(&mut events);
                self.run_id = Some(run_id.clone());
                TranslatorStep::ToolCallsRequired { run_id, calls }
            }
            ProviderEvent::RunEnd => TranslatorStep::Terminal(RunTermination::Completed),
            ProviderEvent::Failed { code, message } => {
                TranslatorStep::Terminal(RunTermination::Failed(RunFailure::provider(code, message)))
            }
            ProviderEvent::Cancelled => TranslatorStep::Terminal(RunTermination::Cancelled),
            ProviderEvent::Exception { message } => TranslatorStep::Terminal(
                RunTermination::Failed(RunFailure::exception("exception", message)),
            ),
            ProviderEvent::Timeout => TranslatorStep::Terminal(RunTermination::Failed(
                RunFailure::timeout("No response from the provider"),
            )),
        };

        (events, step)
    }

    pub fn function_call_processed(
        &self,
        function_name: impl Into<String>,
        arguments: impl Into<String>,
        response: impl Into<String>,
    ) -> RunEvent {
        self.event(RunEventKind::FunctionCallProcessed {
            function_name: function_name.into(),
            arguments: arguments.into(),
            response: response.into(),
        })
    }

    /// Terminal signals; empty once the run has already been finished.
    pub fn finish(&mut self, termination: &RunTermination) -> Vec<RunEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::with_capacity(2);
        match termination {
            RunTermination::Completed => {}
            RunTermination::Failed(failure) => {
                events.push(self.event(RunEventKind::Failed(failure.clone())));
            }
            RunTermination::Cancelled => events.push(self.event(RunEventKind::Cancelled)),
        }
        events.push(self.event(RunEventKind::Ended {
            state: termination.state(),
        }));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, RunState};
    use crate::providers::{RemoteContent, RemoteMessage};

    fn translator() -> RunEventTranslator {
        RunEventTranslator::new("Helper", "Thread 1", "Hello")
    }

    fn delta(text: &str) -> ProviderEvent {
        ProviderEvent::TextDelta {
            text: text.to_string(),
        }
    }

    fn kinds(events: &[RunEvent]) -> Vec<&RunEventKind> {
        events.iter().map(|e| &e.kind).collect()
    }

    #[test]
    fn test_submission_alone_does_not_start() {
        let mut t = translator();
        let (events, step) = t.translate(ProviderEvent::RunCreated {
            run_id: "run_1".to_string(),
        });
        assert!(events.is_empty());
        assert_eq!(step, TranslatorStep::Continue);
        assert_eq!(t.run_id(), Some("run_1"));
        assert!(!t.has_started());
    }

    #[test]
    fn test_start_once_and_first_chunk_flag() {
        let mut t = translator();
        t.translate(ProviderEvent::RunCreated {
            run_id: "run_1".to_string(),
        });

        let (first, _) = t.translate(delta("Hi"));
        assert_eq!(first.len(), 2);
        assert_eq!(
            first[0].kind,
            RunEventKind::Started {
                user_request: "Hello".to_string()
            }
        );
        assert_eq!(first[0].run_id.as_deref(), Some("run_1"));
        assert!(matches!(
            first[1].kind,
            RunEventKind::Updated {
                status: RunUpdateStatus::Streaming,
                is_first_chunk: true,
                ..
            }
        ));

        let (second, _) = t.translate(delta(" there"));
        assert_eq!(second.len(), 1);
        assert!(matches!(
            second[0].kind,
            RunEventKind::Updated {
                is_first_chunk: false,
                ..
            }
        ));
    }

    #[test]
    fn test_tool_call_starts_run() {
        let mut t = translator();
        let calls = vec![ToolCall {
            call_id: "c1".to_string(),
            name: "f".to_string(),
            arguments: "{}".to_string(),
        }];
        let (events, step) = t.translate(ProviderEvent::RequiresToolOutput {
            run_id: "run_9".to_string(),
            calls: calls.clone(),
        });
        assert!(matches!(events[0].kind, RunEventKind::Started { .. }));
        assert_eq!(
            step,
            TranslatorStep::ToolCallsRequired {
                run_id: "run_9".to_string(),
                calls
            }
        );
    }

    #[test]
    fn test_message_done_maps_to_completed_update() {
        let mut t = translator();
        t.translate(delta("a"));
        let (events, _) = t.translate(ProviderEvent::TextDone {
            text: "a".to_string(),
        });
        assert!(matches!(
            events[0].kind,
            RunEventKind::Updated {
                status: RunUpdateStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_materialized_message_is_in_progress_update() {
        let mut t = translator();
        let remote = RemoteMessage {
            id: "msg_1".to_string(),
            role: MessageRole::Assistant,
            assistant_id: None,
            run_id: Some("run_1".to_string()),
            metadata: HashMap::new(),
            content: vec![RemoteContent::Text {
                value: "Done".to_string(),
                annotations: Vec::new(),
            }],
        };
        let (events, _) = t.translate(ProviderEvent::MessageCompleted(remote));
        match &events[1].kind {
            RunEventKind::Updated {
                status: RunUpdateStatus::InProgress,
                payload: Some(UpdatePayload::Message(message)),
                ..
            } => {
                assert_eq!(message.sender, "Helper");
                assert_eq!(message.text_content().as_deref(), Some("Done"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_mapping() {
        let mut t = translator();
        let (_, step) = t.translate(ProviderEvent::Timeout);
        match step {
            TranslatorStep::Terminal(RunTermination::Failed(f)) => {
                assert_eq!(f.kind, FailureKind::Timeout)
            }
            other => panic!("unexpected step: {other:?}"),
        }

        let (_, step) = t.translate(ProviderEvent::Exception {
            message: "socket closed".to_string(),
        });
        match step {
            TranslatorStep::Terminal(RunTermination::Failed(f)) => {
                assert_eq!(f.code, "exception");
                assert_eq!(f.kind, FailureKind::Exception);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_finish_emits_once() {
        let mut t = translator();
        t.translate(delta("x"));
        let failure = RunFailure::provider("server_error", "boom");
        let events = t.finish(&RunTermination::Failed(failure.clone()));
        assert_eq!(
            kinds(&events),
            vec![
                &RunEventKind::Failed(failure),
                &RunEventKind::Ended {
                    state: RunState::Failed
                }
            ]
        );
        assert!(t.finish(&RunTermination::Cancelled).is_empty());
        let (late, _) = t.translate(delta("late"));
        assert!(late.is_empty());
    }

    #[test]
    fn test_cancel_emits_cancelled_then_ended() {
        let mut t = translator();
        let events = t.finish(&RunTermination::Cancelled);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, RunEventKind::Cancelled);
        assert_eq!(
            events[1].kind,
            RunEventKind::Ended {
                state: RunState::Cancelled
            }
        );
    }
}
