use thiserror::Error;

use crate::providers::ProviderError;
use crate::repositories::RepositoryError;
use crate::settings::models::ClientType;

/// Errors surfaced at the orchestration boundary.
///
/// Setup errors (configuration, unknown thread or assistant) abort a single
/// submission and are shown to the user. Run errors are reported through the
/// run's `Failed` terminal state instead and never reach this type unless the
/// run could not be started at all.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("No provider client is configured for {client_type}")]
    NotConfigured { client_type: ClientType },

    #[error("Provider error [{code}]: {message}")]
    Provider { code: String, message: String },

    #[error("Timed out after {seconds:.1}s waiting for {operation}")]
    Timeout { operation: String, seconds: f64 },

    #[error("Function '{name}' is not available")]
    UnknownFunction { name: String },

    #[error("Function '{name}' failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("Thread '{thread}' is not the displayed thread")]
    StaleContext { thread: String },

    #[error("Assistant '{assistant}' already has an active run on thread '{thread}'")]
    RunInProgress { assistant: String, thread: String },

    #[error("Unknown assistant: {name}")]
    UnknownAssistant { name: String },

    #[error("Unknown thread: {name}")]
    UnknownThread { name: String },

    #[error("No assistant selected")]
    NoAssistantSelected,

    #[error("Realtime session of '{assistant}' is not connected")]
    NotConnected { assistant: String },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Persistence error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error should be shown to the user as a modal error
    /// rather than only logged.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::StaleContext { .. })
    }
}

impl From<ProviderError> for ParleyError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Timeout => Self::Timeout {
                operation: "provider response".to_string(),
                seconds: 0.0,
            },
            other => Self::Provider {
                code: other.code(),
                message: other.message(),
            },
        }
    }
}

pub type ParleyResult<T> = Result<T, ParleyError>;
