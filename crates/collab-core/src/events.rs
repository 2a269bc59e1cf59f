//! Event infrastructure for observability.
//!
//! Provides `CollabEvent` for debug/monitoring and `EventBus` for
//! subscriptions. Permission drops and store failures are never surfaced to
//! the submitting session over the wire, so this bus is where they stay
//! discoverable for auditing.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted while a document is live.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CollabEvent {
    /// A session attached to a document.
    SessionAttached {
        #[serde(rename = "formId")]
        form_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// A session detached from a document.
    SessionDetached {
        #[serde(rename = "formId")]
        form_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// An update was merged into the document's replica.
    UpdateApplied {
        #[serde(rename = "formId")]
        form_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Number of added + removed + modified node ids.
        changes: usize,
    },
    /// An update was rejected as malformed; state unchanged.
    UpdateRejected {
        #[serde(rename = "formId")]
        form_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        reason: String,
    },
    /// A mutation from a read-only session was dropped.
    MutationDenied {
        #[serde(rename = "formId")]
        form_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// A snapshot was durably stored.
    SnapshotStored {
        #[serde(rename = "formId")]
        form_id: String,
        bytes: usize,
    },
    /// A snapshot store failed; the in-memory replica remains authoritative.
    SnapshotStoreFailed {
        #[serde(rename = "formId")]
        form_id: String,
        error: String,
    },
    /// The metadata cache entry for a document was rebuilt.
    MetadataRefreshed {
        #[serde(rename = "formId")]
        form_id: String,
        #[serde(rename = "pageCount")]
        page_count: usize,
        #[serde(rename = "fieldCount")]
        field_count: usize,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing collaboration events to subscribers.
///
/// Thread-safe for use in a multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(CollabEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(CollabEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: CollabEvent) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied_event() -> CollabEvent {
        CollabEvent::MutationDenied {
            form_id: "form-1".into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(denied_event());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(denied_event());
            assert_eq!(count.load(Ordering::Relaxed), 1);
            // _sub dropped here
        }

        bus.emit(denied_event());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = CollabEvent::MetadataRefreshed {
            form_id: "form-1".into(),
            page_count: 3,
            field_count: 7,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"metadataRefreshed\""));
        assert!(json.contains("\"pageCount\":3"));
        assert!(json.contains("\"fieldCount\":7"));
    }
}
