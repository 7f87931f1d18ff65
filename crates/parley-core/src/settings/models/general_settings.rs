use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::providers_store::ClientType;

fn default_connection_timeout() -> f64 {
    90.0
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_worker_pool_size() -> usize {
    5
}

fn default_diagnostics_capacity() -> usize {
    200
}

/// Application-wide behaviour switches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Seconds to wait for the next provider response before a run fails
    /// with a timeout.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: f64,
    #[serde(default = "default_true")]
    pub use_streaming: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default)]
    pub use_system_assistant_for_thread_name: bool,
    /// Model used for thread titles; falls back to the first selected
    /// assistant's model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_model: Option<String>,
    #[serde(default)]
    pub active_client_type: ClientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_text_messages: Option<usize>,
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            use_streaming: true,
            poll_interval_ms: default_poll_interval_ms(),
            worker_pool_size: default_worker_pool_size(),
            use_system_assistant_for_thread_name: false,
            title_model: None,
            active_client_type: ClientType::default(),
            max_text_messages: None,
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

impl GeneralSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_secs.max(0.0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pool size never drops below one worker.
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.max(1)
    }
}
