//! Session identity and per-document permission levels.
//!
//! A session is immutable for its lifetime: its permission level is resolved
//! once at connect time, and a permission change requires a new session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Permission level of a session against one document.
///
/// Wire names are `VIEWER`/`EDITOR`/`OWNER`, matching the external
/// auth/permission resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    Viewer,
    Editor,
    Owner,
}

impl PermissionLevel {
    /// Whether this level may cause persisted or broadcast changes.
    pub fn can_edit(&self) -> bool {
        matches!(self, PermissionLevel::Editor | PermissionLevel::Owner)
    }
}

/// An authenticated connection to one document.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub form_id: String,
    pub permission: PermissionLevel,
}

impl Session {
    /// Create a session with a fresh id.
    pub fn new(user_id: impl Into<String>, form_id: impl Into<String>, permission: PermissionLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            form_id: form_id.into(),
            permission,
        }
    }
}
