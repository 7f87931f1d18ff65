pub mod orchestrator;
mod realtime_link;
pub mod run_controller;
pub mod scheduler;

pub use orchestrator::{
    Orchestrator, OrchestratorContext, SubmissionHandle, SubmissionOutcome, SubmitRequest,
};
pub use run_controller::{AssistantRunController, RunContext, RunEventSink, RunSettings};
pub use scheduler::{ScheduleInfo, ScheduleSpec, TaskEventHandler, TaskScheduler};
