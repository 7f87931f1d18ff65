use chrono::{DateTime, Local};

use super::message::{Conversation, ConversationMessage};
use super::run::{RunFailure, RunState};
use super::thread::Attachment;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunUpdateStatus {
    /// A fully materialized message.
    InProgress,
    /// An incremental text delta.
    Streaming,
    /// A message finished; the receiver re-fetches the transcript.
    Completed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdatePayload {
    Text(String),
    Message(ConversationMessage),
}

/// Lifecycle signal of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunEvent {
    pub assistant: String,
    /// Unset until the provider assigned an id.
    pub run_id: Option<String>,
    pub thread: String,
    pub timestamp: DateTime<Local>,
    pub kind: RunEventKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunEventKind {
    Started {
        user_request: String,
    },
    Updated {
        status: RunUpdateStatus,
        is_first_chunk: bool,
        payload: Option<UpdatePayload>,
    },
    FunctionCallProcessed {
        function_name: String,
        arguments: String,
        response: String,
    },
    Failed(RunFailure),
    Cancelled,
    Ended {
        state: RunState,
    },
}

/// Notifications for the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    ProcessingStarted {
        assistant: String,
        scheduled: bool,
    },
    ProcessingStopped {
        assistant: String,
        scheduled: bool,
    },
    UserMessage {
        thread: Option<String>,
        text: String,
    },
    StreamChunk {
        assistant: String,
        thread: String,
        text: String,
        is_first_chunk: bool,
    },
    MessageAppended {
        thread: String,
        message: ConversationMessage,
    },
    ConversationRefreshed {
        conversation: Conversation,
    },
    AttachmentsUpdated {
        thread: String,
        attachments: Vec<Attachment>,
    },
    ThreadCreated {
        name: String,
        scheduled: bool,
    },
    ThreadRenamed {
        old_name: String,
        new_name: String,
    },
    ThreadDeleted {
        name: String,
    },
    Connected {
        assistant: String,
        thread: String,
    },
    Disconnected {
        assistant: String,
    },
    Error {
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum AppEvent {
    Run(RunEvent),
    View(ViewEvent),
}

/// Discriminant used to register handlers for a subset of events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStarted,
    RunUpdated,
    FunctionCallProcessed,
    RunFailed,
    RunCancelled,
    RunEnded,
    ProcessingStarted,
    ProcessingStopped,
    UserMessage,
    StreamChunk,
    MessageAppended,
    ConversationRefreshed,
    AttachmentsUpdated,
    ThreadCreated,
    ThreadRenamed,
    ThreadDeleted,
    Connected,
    Disconnected,
    Error,
}

impl EventKind {
    pub const RUN_LIFECYCLE: [EventKind; 6] = [
        EventKind::RunStarted,
        EventKind::RunUpdated,
        EventKind::FunctionCallProcessed,
        EventKind::RunFailed,
        EventKind::RunCancelled,
        EventKind::RunEnded,
    ];
}

impl AppEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AppEvent::Run(event) => match &event.kind {
                RunEventKind::Started { .. } => EventKind::RunStarted,
                RunEventKind::Updated { .. } => EventKind::RunUpdated,
                RunEventKind::FunctionCallProcessed { .. } => EventKind::FunctionCallProcessed,
                RunEventKind::Failed(_) => EventKind::RunFailed,
                RunEventKind::Cancelled => EventKind::RunCancelled,
                RunEventKind::Ended { .. } => EventKind::RunEnded,
            },
            AppEvent::View(event) => match event {
                ViewEvent::ProcessingStarted { .. } => EventKind::ProcessingStarted,
                ViewEvent::ProcessingStopped { .. } => EventKind::ProcessingStopped,
                ViewEvent::UserMessage { .. } => EventKind::UserMessage,
                ViewEvent::StreamChunk { .. } => EventKind::StreamChunk,
                ViewEvent::MessageAppended { .. } => EventKind::MessageAppended,
                ViewEvent::ConversationRefreshed { .. } => EventKind::ConversationRefreshed,
                ViewEvent::AttachmentsUpdated { .. } => EventKind::AttachmentsUpdated,
                ViewEvent::ThreadCreated { .. } => EventKind::ThreadCreated,
                ViewEvent::ThreadRenamed { .. } => EventKind::ThreadRenamed,
                ViewEvent::ThreadDeleted { .. } => EventKind::ThreadDeleted,
                ViewEvent::Connected { .. } => EventKind::Connected,
                ViewEvent::Disconnected { .. } => EventKind::Disconnected,
                ViewEvent::Error { .. } => EventKind::Error,
            },
        }
    }
}
