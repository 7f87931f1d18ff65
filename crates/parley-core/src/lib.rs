//! Orchestration core for multi-assistant conversations backed by a remote
//! assistants API: thread persistence, run lifecycle translation, tool
//! round-trips, scheduling and presentation-facing notifications.

pub mod controllers;
pub mod error;
pub mod factories;
pub mod functions;
pub mod models;
pub mod providers;
pub mod repositories;
pub mod services;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use controllers::{
    AssistantRunController, Orchestrator, OrchestratorContext, ScheduleSpec, SubmissionHandle,
    SubmissionOutcome, SubmitRequest, TaskEventHandler, TaskScheduler,
};
pub use error::{ParleyError, ParleyResult};
pub use services::EventBus;
