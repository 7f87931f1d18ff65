use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ParleyResult;
use crate::models::task::MULTI_ASSISTANT;
use crate::models::{LockedMap, ScheduledTask, TaskEvent};

/// When and how often a task runs.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleSpec {
    /// Absent or past means now.
    pub start_at: Option<DateTime<Local>>,
    pub interval: Duration,
    pub recurrence_count: u32,
}

impl ScheduleSpec {
    pub fn once() -> Self {
        Self {
            start_at: None,
            interval: Duration::ZERO,
            recurrence_count: 1,
        }
    }

    pub fn every(interval: Duration, recurrence_count: u32) -> Self {
        Self {
            start_at: None,
            interval,
            recurrence_count,
        }
    }

    pub fn starting_at(mut self, start_at: DateTime<Local>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    fn initial_delay(&self) -> Duration {
        self.start_at
            .and_then(|at| (at - Local::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self::once()
    }
}

/// Receives the callbacks of every schedule. An `Execute` error ends the
/// schedule with `Failed`.
#[async_trait]
pub trait TaskEventHandler: Send + Sync {
    async fn on_task_event(&self, event: TaskEvent) -> ParleyResult<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleInfo {
    pub id: String,
    pub assistant: String,
    pub task: ScheduledTask,
    pub spec: ScheduleSpec,
}

#[derive(Clone)]
struct ScheduleEntry {
    info: ScheduleInfo,
    abort: Option<AbortHandle>,
}

pub struct TaskScheduler {
    handler: Arc<dyn TaskEventHandler>,
    schedules: Arc<LockedMap<String, ScheduleEntry>>,
}

impl TaskScheduler {
    pub fn new(handler: Arc<dyn TaskEventHandler>) -> Self {
        Self {
            handler,
            schedules: Arc::new(LockedMap::new()),
        }
    }

    /// Start a schedule and return its id.
    pub fn schedule(&self, assistant: &str, task: ScheduledTask, spec: ScheduleSpec) -> String {
        let id = Uuid::new_v4().to_string();
        let info = ScheduleInfo {
            id: id.clone(),
            assistant: assistant.to_string(),
            task,
            spec,
        };
        self.schedules.insert(
            id.clone(),
            ScheduleEntry {
                info: info.clone(),
                abort: None,
            },
        );
        info!(schedule_id = %id, assistant = %assistant, task = info.task.label(), "Task scheduled");

        let handler = self.handler.clone();
        let schedules = self.schedules.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            run_schedule(info, handler).await;
            schedules.remove(&task_id);
        });
        self.schedules
            .update(&id, |entry| entry.abort = Some(handle.abort_handle()));
        id
    }

    /// Stop a schedule; its binding is released through a `Failed` callback.
    pub async fn cancel(&self, schedule_id: &str) -> bool {
        let Some(entry) = self.schedules.remove(&schedule_id.to_string()) else {
            return false;
        };
        if let Some(abort) = entry.abort {
            abort.abort();
        }
        info!(schedule_id = %schedule_id, "Schedule cancelled");

        let event = TaskEvent::Failed {
            schedule_id: schedule_id.to_string(),
            assistant: reported_assistant(&entry.info),
            error: "Schedule cancelled".to_string(),
        };
        if let Err(e) = self.handler.on_task_event(event).await {
            warn!(schedule_id = %schedule_id, error = %e, "Failed to report cancelled schedule");
        }
        true
    }

    pub fn schedules(&self) -> Vec<ScheduleInfo> {
        let mut infos: Vec<ScheduleInfo> = self
            .schedules
            .values()
            .into_iter()
            .map(|entry| entry.info)
            .collect();
        infos.sort_by(|a, b| a.assistant.cmp(&b.assistant).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn shutdown(&self) {
        for entry in self.schedules.values() {
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
    }
}

fn reported_assistant(info: &ScheduleInfo) -> String {
    match info.task {
        ScheduledTask::Multi { .. } => MULTI_ASSISTANT.to_string(),
        _ => info.assistant.clone(),
    }
}

async fn run_schedule(info: ScheduleInfo, handler: Arc<dyn TaskEventHandler>) {
    let assistant = reported_assistant(&info);
    let delay = info.spec.initial_delay();
    if !delay.is_zero() {
        debug!(schedule_id = %info.id, delay_secs = delay.as_secs(), "Waiting for start time");
        tokio::time::sleep(delay).await;
    }

    let recurrences = info.spec.recurrence_count.max(1);
    for recurrence in 0..recurrences {
        if recurrence > 0 {
            tokio::time::sleep(info.spec.interval).await;
        }

        let started = TaskEvent::Started {
            schedule_id: info.id.clone(),
            assistant: assistant.clone(),
        };
        if let Err(e) = handler.on_task_event(started).await {
            warn!(schedule_id = %info.id, error = %e, "Task start callback failed");
        }

        for (target, request) in info.task.executions(&info.assistant) {
            let execute = TaskEvent::Execute {
                schedule_id: info.id.clone(),
                assistant: target.clone(),
                request,
            };
            if let Err(e) = handler.on_task_event(execute).await {
                warn!(schedule_id = %info.id, assistant = %target, error = %e, "Task execution failed");
                let failed = TaskEvent::Failed {
                    schedule_id: info.id.clone(),
                    assistant: assistant.clone(),
                    error: e.to_string(),
                };
                if let Err(e) = handler.on_task_event(failed).await {
                    warn!(schedule_id = %info.id, error = %e, "Task failure callback failed");
                }
                return;
            }
        }
    }

    let completed = TaskEvent::Completed {
        schedule_id: info.id.clone(),
        assistant,
        result: format!("{recurrences} recurrence(s) of {} task completed", info.task.label()),
    };
    if let Err(e) = handler.on_task_event(completed).await {
        warn!(schedule_id = %info.id, error = %e, "Task completion callback failed");
    }
    info!(schedule_id = %info.id, "Schedule finished");
}
