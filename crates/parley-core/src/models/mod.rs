pub mod diagnostics_store;
pub mod events;
pub mod locked_map;
pub mod message;
pub mod processing_state;
pub mod run;
pub mod task;
pub mod thread;

pub use diagnostics_store::{DiagnosticsStore, ErrorEntry, ErrorLevel, FunctionCallRecord, RunRecord};
pub use events::{
    AppEvent, EventKind, RunEvent, RunEventKind, RunUpdateStatus, UpdatePayload, ViewEvent,
};
pub use locked_map::LockedMap;
pub use message::{Conversation, ConversationMessage, MessageContent, MessageRole};
pub use processing_state::{ProcessingFlags, ProcessingGuard, ProcessingStates};
pub use run::{FailureKind, RunFailure, RunState, RunSummary, RunTermination};
pub use task::{ScheduledTask, TaskEvent};
pub use thread::{Attachment, AttachmentKind, ThreadRecord, ThreadTable};
