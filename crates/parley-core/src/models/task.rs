use serde::{Deserialize, Serialize};

/// Assistant name reported for multi-assistant tasks.
pub const MULTI_ASSISTANT: &str = "multi-assistant";

/// Work a schedule performs on every recurrence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduledTask {
    Basic { request: String },
    /// Several requests against the scheduling assistant.
    Batch { requests: Vec<String> },
    /// One request per listed assistant.
    Multi { requests: Vec<(String, String)> },
}

impl ScheduledTask {
    /// `(assistant, request)` pairs of one recurrence, in order.
    pub fn executions(&self, assistant: &str) -> Vec<(String, String)> {
        match self {
            Self::Basic { request } => vec![(assistant.to_string(), request.clone())],
            Self::Batch { requests } => requests
                .iter()
                .map(|r| (assistant.to_string(), r.clone()))
                .collect(),
            Self::Multi { requests } => requests.clone(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Batch { .. } => "batch",
            Self::Multi { .. } => "multi",
        }
    }
}

/// Callbacks fired by the scheduler for one schedule id.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskEvent {
    Started {
        schedule_id: String,
        assistant: String,
    },
    Execute {
        schedule_id: String,
        assistant: String,
        request: String,
    },
    Completed {
        schedule_id: String,
        assistant: String,
        result: String,
    },
    Failed {
        schedule_id: String,
        assistant: String,
        error: String,
    },
}

impl TaskEvent {
    pub fn schedule_id(&self) -> &str {
        match self {
            Self::Started { schedule_id, .. }
            | Self::Execute { schedule_id, .. }
            | Self::Completed { schedule_id, .. }
            | Self::Failed { schedule_id, .. } => schedule_id,
        }
    }
}
