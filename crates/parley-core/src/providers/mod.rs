//! Contract between the orchestration core and a remote assistants API.

pub mod openai;
pub mod realtime;
pub mod sse;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::functions::FunctionDefinition;
use crate::models::{AttachmentKind, MessageRole};
use crate::settings::models::ClientType;

pub use openai::OpenAiClient;
pub use realtime::{
    ConnectionState, OpenAiRealtimeConnector, RealtimeConnector, RealtimeSession,
    RealtimeSessionConfig,
};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}) [{code}]: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("File error: {0}")]
    File(String),
}

impl ProviderError {
    pub fn code(&self) -> String {
        match self {
            Self::Http(_) => "http_error".to_string(),
            Self::Api { code, .. } => code.clone(),
            Self::Timeout => "timeout".to_string(),
            Self::InvalidResponse(_) => "invalid_response".to_string(),
            Self::Unsupported(_) => "unsupported".to_string(),
            Self::File(_) => "file_error".to_string(),
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::Http(m) | Self::InvalidResponse(m) | Self::Unsupported(m) | Self::File(m) => {
                m.clone()
            }
            Self::Timeout => "Request timed out".to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Http(error.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// One requested function call of a tool call batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub call_id: String,
    pub output: String,
}

/// Events of one run in provider order. Nothing follows a terminal event
/// (`RunEnd`, `Failed`, `Cancelled`, `Exception`, `Timeout`).
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    RunCreated {
        run_id: String,
    },
    MessageCreated {
        message_id: String,
    },
    TextDelta {
        text: String,
    },
    TextDone {
        text: String,
    },
    /// A fully materialized message (polling mode).
    MessageCompleted(RemoteMessage),
    ToolCallDelta {
        call_id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    ToolCallDone {
        call_id: String,
        name: String,
    },
    /// The run is paused until every call of the batch has an output.
    RequiresToolOutput {
        run_id: String,
        calls: Vec<ToolCall>,
    },
    RunEnd,
    Failed {
        code: String,
        message: String,
    },
    Cancelled,
    Exception {
        message: String,
    },
    Timeout,
}

impl ProviderEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunEnd
                | Self::Failed { .. }
                | Self::Cancelled
                | Self::Exception { .. }
                | Self::Timeout
        )
    }
}

pub type EventStream = BoxStream<'static, ProviderEvent>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunHandle {
    pub thread_id: String,
    pub run_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    pub thread_id: String,
    pub assistant_id: String,
    pub additional_instructions: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
    Incomplete,
}

impl RunStatus {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "requires_action" => Self::RequiresAction,
            "cancelling" => Self::Cancelling,
            "cancelled" => Self::Cancelled,
            "failed" => Self::Failed,
            "completed" => Self::Completed,
            "expired" => Self::Expired,
            "incomplete" => Self::Incomplete,
            _ => return None,
        })
    }
}

/// Polled state of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub required_tool_calls: Vec<ToolCall>,
    /// `(code, message)` of a failed run.
    pub last_error: Option<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAttachment {
    pub file_id: String,
    pub kind: AttachmentKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    pub attachments: Vec<MessageAttachment>,
    pub image_file_ids: Vec<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationKind {
    FileCitation { file_id: String },
    FilePath { file_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// Text span in the message that the annotation replaces.
    pub text: String,
    pub kind: AnnotationKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteContent {
    Text {
        value: String,
        annotations: Vec<Annotation>,
    },
    ImageFile {
        file_id: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: String,
    pub role: MessageRole,
    pub assistant_id: Option<String>,
    pub run_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub content: Vec<RemoteContent>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub id: String,
    pub filename: String,
}

/// What is needed to create a remote assistant.
#[derive(Clone, Debug, PartialEq)]
pub struct AssistantDefinition {
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub functions: Vec<FunctionDefinition>,
    pub code_interpreter: bool,
    pub file_search: bool,
}

/// Remote assistants API used by the controllers and the thread store.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn client_type(&self) -> ClientType;

    async fn create_assistant(&self, definition: &AssistantDefinition) -> ProviderResult<String>;

    async fn create_thread(&self) -> ProviderResult<String>;

    async fn delete_thread(&self, thread_id: &str) -> ProviderResult<()>;

    async fn create_message(&self, thread_id: &str, message: &NewMessage) -> ProviderResult<()>;

    /// Messages oldest first, optionally only those produced by `run_id`.
    async fn list_messages(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
    ) -> ProviderResult<Vec<RemoteMessage>>;

    async fn upload_file(&self, path: &Path) -> ProviderResult<String>;

    async fn delete_file(&self, file_id: &str) -> ProviderResult<()>;

    async fn file_info(&self, file_id: &str) -> ProviderResult<FileInfo>;

    async fn download_file(&self, file_id: &str) -> ProviderResult<Vec<u8>>;

    /// Create a run without streaming; progress is observed by polling.
    async fn submit_run(&self, request: &RunRequest) -> ProviderResult<RunHandle>;

    /// Create a run and stream its events; the first event is `RunCreated`.
    async fn stream_run(&self, request: &RunRequest) -> ProviderResult<EventStream>;

    async fn retrieve_run(&self, handle: &RunHandle) -> ProviderResult<RunSnapshot>;

    async fn submit_tool_outputs(
        &self,
        handle: &RunHandle,
        outputs: &[ToolOutput],
    ) -> ProviderResult<()>;

    /// Resume a streamed run; events continue on the returned stream.
    async fn stream_tool_outputs(
        &self,
        handle: &RunHandle,
        outputs: &[ToolOutput],
    ) -> ProviderResult<EventStream>;

    async fn cancel_run(&self, handle: &RunHandle) -> ProviderResult<()>;

    /// One-shot chat completion, used for thread titles.
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> ProviderResult<String>;
}
