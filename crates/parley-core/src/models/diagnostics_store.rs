use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Receiver;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::events::{RunEvent, RunEventKind};
use super::run::RunState;

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorLevel {
    Warning,
    Error,
}

/// A WARN or ERROR log record captured by the collector layer.
#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub timestamp: SystemTime,
    pub level: ErrorLevel,
    pub message: String,
    pub target: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCallRecord {
    pub name: String,
    pub arguments: String,
    pub response: String,
    pub timestamp: DateTime<Local>,
}

/// Diagnostic trace of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub assistant: String,
    pub thread: String,
    pub run_id: Option<String>,
    pub user_request: String,
    pub started_at: DateTime<Local>,
    pub function_calls: Vec<FunctionCallRecord>,
    pub ended_at: Option<DateTime<Local>>,
    pub state: Option<RunState>,
    /// Final assistant text or failure description.
    pub outcome: Option<String>,
}

impl RunRecord {
    fn matches(&self, event: &RunEvent) -> bool {
        self.ended_at.is_none()
            && self.assistant == event.assistant
            && self.thread == event.thread
            && (self.run_id.is_none() || self.run_id == event.run_id)
    }
}

/// Bounded store of captured log errors and run traces (FIFO eviction).
pub struct DiagnosticsStore {
    entries: Mutex<VecDeque<ErrorEntry>>,
    runs: Mutex<VecDeque<RunRecord>>,
    max_entries: usize,
}

impl DiagnosticsStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            runs: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn add_entry(&self, entry: ErrorEntry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    pub fn get_all_entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == ErrorLevel::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == ErrorLevel::Warning)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.runs.lock().clear();
    }

    /// Drain entries produced by `ErrorCollectorLayer` on a background thread.
    pub fn collect_from(self: &std::sync::Arc<Self>, receiver: Receiver<ErrorEntry>) {
        let store = self.clone();
        std::thread::spawn(move || {
            while let Ok(entry) = receiver.recv() {
                store.add_entry(entry);
            }
        });
    }

    /// Fold a run lifecycle signal into the run traces.
    pub fn record_run_event(&self, event: &RunEvent) {
        let mut runs = self.runs.lock();
        match &event.kind {
            RunEventKind::Started { user_request } => {
                runs.push_back(RunRecord {
                    assistant: event.assistant.clone(),
                    thread: event.thread.clone(),
                    run_id: event.run_id.clone(),
                    user_request: user_request.clone(),
                    started_at: event.timestamp,
                    function_calls: Vec::new(),
                    ended_at: None,
                    state: None,
                    outcome: None,
                });
                while runs.len() > self.max_entries {
                    runs.pop_front();
                }
            }
            RunEventKind::FunctionCallProcessed {
                function_name,
                arguments,
                response,
            } => {
                if let Some(record) = runs.iter_mut().rev().find(|r| r.matches(event)) {
                    record.function_calls.push(FunctionCallRecord {
                        name: function_name.clone(),
                        arguments: arguments.clone(),
                        response: response.clone(),
                        timestamp: event.timestamp,
                    });
                }
            }
            RunEventKind::Failed(failure) => {
                if let Some(record) = runs.iter_mut().rev().find(|r| r.matches(event)) {
                    record.outcome = Some(failure.to_string());
                }
            }
            RunEventKind::Ended { state } => {
                if let Some(record) = runs.iter_mut().rev().find(|r| r.matches(event)) {
                    record.ended_at = Some(event.timestamp);
                    record.state = Some(*state);
                    if record.run_id.is_none() {
                        record.run_id = event.run_id.clone();
                    }
                }
            }
            RunEventKind::Updated { .. } | RunEventKind::Cancelled => {}
        }
    }

    /// Attach the final assistant text to the latest ended run of `assistant`.
    pub fn set_run_outcome(&self, assistant: &str, run_id: Option<&str>, outcome: String) {
        let mut runs = self.runs.lock();
        if let Some(record) = runs
            .iter_mut()
            .rev()
            .find(|r| r.assistant == assistant && r.run_id.as_deref() == run_id)
            && record.outcome.is_none()
        {
            record.outcome = Some(outcome);
        }
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().iter().cloned().collect()
    }
}
