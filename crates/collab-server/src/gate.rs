//! Per-change permission enforcement.
//!
//! Every incoming update is checked against the originating session's
//! permission level before it can reach the shared replica, persistence or
//! other sessions. The check runs per mutation, never cached per connection.
//! A denied mutation is dropped silently on the wire - the submitting
//! session gets no error frame - but is logged and emitted on the event bus
//! so drops stay discoverable for debugging and auditing.

use collab_core::events::{CollabEvent, EventBus};
use collab_core::session::Session;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("Mutation denied for read-only session")]
pub struct MutationDenied;

/// Filters mutations by the originating session's permission.
pub struct MutationGate {
    events: Arc<EventBus>,
    denied: AtomicU64,
}

impl MutationGate {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            denied: AtomicU64::new(0),
        }
    }

    /// Check whether a session may cause a persisted or broadcast change.
    pub fn admit(&self, session: &Session) -> Result<(), MutationDenied> {
        if session.permission.can_edit() {
            return Ok(());
        }

        self.denied.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Dropped mutation from read-only session {} (user {}) on {}",
            session.id, session.user_id, session.form_id
        );
        self.events.emit(CollabEvent::MutationDenied {
            form_id: session.form_id.clone(),
            session_id: session.id.to_string(),
            user_id: session.user_id.clone(),
        });
        Err(MutationDenied)
    }

    /// Total mutations dropped since startup.
    pub fn denied_count(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::session::PermissionLevel;
    use std::sync::atomic::AtomicUsize;

    fn session(permission: PermissionLevel) -> Session {
        Session::new("u1", "form-1", permission)
    }

    #[test]
    fn test_editor_and_owner_admitted() {
        let gate = MutationGate::new(Arc::new(EventBus::new()));
        assert!(gate.admit(&session(PermissionLevel::Editor)).is_ok());
        assert!(gate.admit(&session(PermissionLevel::Owner)).is_ok());
        assert_eq!(gate.denied_count(), 0);
    }

    #[test]
    fn test_viewer_denied_and_counted() {
        let gate = MutationGate::new(Arc::new(EventBus::new()));
        let viewer = session(PermissionLevel::Viewer);

        for _ in 0..3 {
            assert!(gate.admit(&viewer).is_err());
        }
        assert_eq!(gate.denied_count(), 3);
    }

    #[test]
    fn test_denial_emits_event() {
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _sub = events.subscribe(move |event| {
            if matches!(event, CollabEvent::MutationDenied { .. }) {
                seen_clone.fetch_add(1, Ordering::Relaxed);
            }
        });

        let gate = MutationGate::new(Arc::clone(&events));
        let _ = gate.admit(&session(PermissionLevel::Viewer));

        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }
}
