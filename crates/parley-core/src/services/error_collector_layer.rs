use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::time::SystemTime;

use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;

use crate::models::{ErrorEntry, ErrorLevel};

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.to_string());
    }
}

/// Tracing layer that forwards WARN and ERROR events to the diagnostics
/// store. Sending never blocks; entries are dropped when the channel is full.
pub struct ErrorCollectorLayer {
    sender: SyncSender<ErrorEntry>,
}

impl ErrorCollectorLayer {
    pub fn new() -> (Self, Receiver<ErrorEntry>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, Receiver<ErrorEntry>) {
        let (sender, receiver) = sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCollectorLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        let level = match *metadata.level() {
            Level::ERROR => ErrorLevel::Error,
            Level::WARN => ErrorLevel::Warning,
            _ => return,
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let _ = self.sender.try_send(ErrorEntry {
            timestamp: SystemTime::now(),
            level,
            message: visitor.message.unwrap_or_default(),
            target: metadata.target().to_string(),
            file: metadata.file().map(String::from),
            line: metadata.line(),
            fields: visitor.fields,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiagnosticsStore;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn collect(emit: impl FnOnce()) -> Vec<ErrorEntry> {
        let (layer, rx) = ErrorCollectorLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, emit);
        rx.try_iter().collect()
    }

    #[test]
    fn test_captures_warnings_and_errors_in_order() {
        let entries = collect(|| {
            tracing::info!("run started");
            tracing::warn!("slow provider");
            tracing::debug!("delta");
            tracing::error!("run failed");
        });

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, ErrorLevel::Warning);
        assert!(entries[0].message.contains("slow provider"));
        assert_eq!(entries[1].level, ErrorLevel::Error);
        assert!(entries[1].message.contains("run failed"));
    }

    #[test]
    fn test_captures_structured_fields_and_target() {
        let entries = collect(|| {
            tracing::error!(
                target: "parley::run",
                assistant = "Helper",
                attempt = 3u64,
                cancelled = false,
                "Run failed"
            );
        });

        let entry = &entries[0];
        assert_eq!(entry.target, "parley::run");
        assert_eq!(entry.fields.get("assistant").map(String::as_str), Some("Helper"));
        assert_eq!(entry.fields.get("attempt").map(String::as_str), Some("3"));
        assert_eq!(entry.fields.get("cancelled").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_full_channel_drops_entries() {
        let (layer, rx) = ErrorCollectorLayer::with_capacity(2);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..10 {
                tracing::error!("overflow {i}");
            }
        });
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_feeds_diagnostics_store() {
        let (layer, rx) = ErrorCollectorLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("first");
            tracing::error!("second");
        });

        let store = Arc::new(DiagnosticsStore::new(10));
        for entry in rx.try_iter() {
            store.add_entry(entry);
        }
        assert_eq!(store.error_count(), 1);
        assert_eq!(store.warning_count(), 1);
    }
}
