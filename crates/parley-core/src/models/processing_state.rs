use std::sync::Arc;

use parking_lot::Mutex;

use super::events::{AppEvent, ViewEvent};
use super::locked_map::LockedMap;
use crate::services::EventBus;

/// Per-assistant processing flags. Interactive and scheduled work are
/// tracked separately so a scheduled run does not lock the input box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessingFlags {
    pub user_input: bool,
    pub scheduled_task: bool,
}

impl ProcessingFlags {
    pub fn is_processing(&self) -> bool {
        self.user_input || self.scheduled_task
    }

    fn set(&mut self, scheduled: bool, value: bool) {
        if scheduled {
            self.scheduled_task = value;
        } else {
            self.user_input = value;
        }
    }
}

/// Processing flags of all assistants. Each assistant has its own lock.
pub struct ProcessingStates {
    flags: LockedMap<String, Arc<Mutex<ProcessingFlags>>>,
    bus: Arc<EventBus>,
}

impl ProcessingStates {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            flags: LockedMap::new(),
            bus,
        }
    }

    fn entry(&self, assistant: &str) -> Arc<Mutex<ProcessingFlags>> {
        self.flags
            .compute_if_absent(assistant.to_string(), || Arc::new(Mutex::new(ProcessingFlags::default())))
    }

    /// Mark `assistant` busy and publish `ProcessingStarted`. The returned
    /// guard clears the flag and publishes `ProcessingStopped` exactly once.
    pub fn begin(&self, assistant: &str, scheduled: bool) -> ProcessingGuard {
        let flags = self.entry(assistant);
        flags.lock().set(scheduled, true);
        self.bus.publish(AppEvent::View(ViewEvent::ProcessingStarted {
            assistant: assistant.to_string(),
            scheduled,
        }));

        ProcessingGuard {
            assistant: assistant.to_string(),
            scheduled,
            flags,
            bus: self.bus.clone(),
        }
    }

    pub fn flags(&self, assistant: &str) -> ProcessingFlags {
        self.flags
            .get(&assistant.to_string())
            .map(|f| *f.lock())
            .unwrap_or_default()
    }

    pub fn is_processing(&self, assistant: &str) -> bool {
        self.flags(assistant).is_processing()
    }

    pub fn processing_assistants(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .flags
            .keys()
            .into_iter()
            .filter(|name| self.is_processing(name))
            .collect();
        names.sort();
        names
    }
}

pub struct ProcessingGuard {
    assistant: String,
    scheduled: bool,
    flags: Arc<Mutex<ProcessingFlags>>,
    bus: Arc<EventBus>,
}

impl ProcessingGuard {
    pub fn assistant(&self) -> &str {
        &self.assistant
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.flags.lock().set(self.scheduled, false);
        self.bus.publish(AppEvent::View(ViewEvent::ProcessingStopped {
            assistant: self.assistant.clone(),
            scheduled: self.scheduled,
        }));
    }
}
