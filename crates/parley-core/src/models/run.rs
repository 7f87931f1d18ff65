use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one run of one assistant on one thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Submitted,
    Streaming,
    Polling,
    RequiresToolOutput,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Submitted | Self::Streaming | Self::Polling | Self::RequiresToolOutput
        )
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, Submitted) => true,
            (Idle, Failed) => true,
            (Submitted, Streaming | Polling) => true,
            (Streaming | Polling, RequiresToolOutput) => true,
            (RequiresToolOutput, Submitted) => true,
            (Submitted | Streaming | Polling | RequiresToolOutput, Completed | Failed | Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Submitted => "submitted",
            Self::Streaming => "streaming",
            Self::Polling => "polling",
            Self::RequiresToolOutput => "requires_tool_output",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Reported by the provider with its own code.
    Provider,
    /// No provider response within the connection timeout.
    Timeout,
    /// Transport or decoding fault on our side.
    Exception,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl RunFailure {
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Provider,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            code: "timeout".to_string(),
            message: message.into(),
        }
    }

    pub fn exception(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Exception,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunTermination {
    Completed,
    Failed(RunFailure),
    Cancelled,
}

impl RunTermination {
    pub fn state(&self) -> RunState {
        match self {
            Self::Completed => RunState::Completed,
            Self::Failed(_) => RunState::Failed,
            Self::Cancelled => RunState::Cancelled,
        }
    }
}

/// Returned by the controller once a run reached its terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub assistant: String,
    pub thread: String,
    pub run_id: Option<String>,
    pub state: RunState,
    pub failure: Option<RunFailure>,
}
