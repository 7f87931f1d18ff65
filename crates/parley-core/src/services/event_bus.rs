use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::models::{AppEvent, EventKind};

pub type SubscriptionId = u64;

type Handler = Arc<dyn Fn(&AppEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every event.
    kinds: Option<HashSet<EventKind>>,
    handler: Handler,
}

/// Dispatches tagged events to handlers registered for a subset of kinds.
///
/// Delivery is synchronous on the publishing task, so events of one run
/// reach every handler in emission order. Handlers must not block; the
/// presentation layer typically forwards into a channel.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        kinds: &[EventKind],
        handler: impl Fn(&AppEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.register(Some(kinds.iter().copied().collect()), Arc::new(handler))
    }

    pub fn subscribe_all(&self, handler: impl Fn(&AppEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kinds: Option<HashSet<EventKind>>, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push(Subscription { id, kinds, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn publish(&self, event: AppEvent) {
        let kind = event.kind();
        // Handlers run outside the lock so they may (un)subscribe.
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kinds.as_ref().is_none_or(|k| k.contains(&kind)))
            .map(|s| s.handler.clone())
            .collect();

        trace!(kind = ?kind, handlers = handlers.len(), "Publishing event");
        for handler in handlers {
            handler(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViewEvent;
    use parking_lot::Mutex;

    fn error(message: &str) -> AppEvent {
        AppEvent::View(ViewEvent::Error {
            message: message.to_string(),
        })
    }

    fn thread_deleted(name: &str) -> AppEvent {
        AppEvent::View(ViewEvent::ThreadDeleted {
            name: name.to_string(),
        })
    }

    #[test]
    fn test_handlers_only_receive_registered_kinds() {
        let bus = EventBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let everything = Arc::new(Mutex::new(Vec::new()));

        let sink = errors.clone();
        bus.subscribe(&[EventKind::Error], move |e| sink.lock().push(e.clone()));
        let sink = everything.clone();
        bus.subscribe_all(move |e| sink.lock().push(e.clone()));

        bus.publish(error("boom"));
        bus.publish(thread_deleted("old"));

        assert_eq!(errors.lock().len(), 1);
        assert_eq!(everything.lock().len(), 2);
    }

    #[test]
    fn test_events_arrive_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(&[EventKind::Error], move |e| {
            if let AppEvent::View(ViewEvent::Error { message }) = e {
                sink.lock().push(message.clone());
            }
        });

        for i in 0..5 {
            bus.publish(error(&i.to_string()));
        }
        assert_eq!(*seen.lock(), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let id = bus.subscribe_all(move |_| *sink.lock() += 1);

        bus.publish(error("a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(error("b"));
        assert_eq!(*count.lock(), 1);
    }
}
