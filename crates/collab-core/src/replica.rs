//! FormReplica: Loro document wrapper for a single form definition.
//!
//! Each open form is represented as a Loro document with:
//! - `pages`: movable list of page maps, each holding a nested `fields`
//!   movable list of field maps
//! - `layout`: LoroMap of scalar layout properties (last-writer-wins per key)
//! - `settings`: LoroMap for document-level flags (`isShuffleEnabled`)
//!
//! Ordered collections use Loro's movable-list CRDT, so concurrent inserts,
//! moves and deletes from different sessions converge deterministically
//! without index collisions. Scalar properties converge last-writer-wins.

use crate::codec;
use crate::schema::FormSchema;
use loro::{ExportMode, LoroDoc, LoroMap, LoroMovableList, VersionVector};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("Loro error: {0}")]
    Loro(String),
}

pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Node id of the layout pseudo-node in a [`ChangeSet`].
pub const LAYOUT_NODE: &str = "layout";
/// Node id of the settings pseudo-node in a [`ChangeSet`].
pub const SETTINGS_NODE: &str = "settings";

/// The live in-memory CRDT tree for one open document.
pub struct FormReplica {
    doc: LoroDoc,
}

impl Default for FormReplica {
    fn default() -> Self {
        Self::new()
    }
}

impl FormReplica {
    /// Create a new empty replica with no pages and no layout.
    pub fn new() -> Self {
        Self { doc: LoroDoc::new() }
    }

    /// Reconstruct a replica from a persisted snapshot.
    ///
    /// The result is semantically equal to the replica that produced the
    /// snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)
            .map_err(|e| ReplicaError::Loro(e.to_string()))?;
        Ok(Self { doc })
    }

    /// Get the `pages` container.
    pub fn pages(&self) -> LoroMovableList {
        self.doc.get_movable_list("pages")
    }

    /// Get the `layout` container.
    pub fn layout(&self) -> LoroMap {
        self.doc.get_map("layout")
    }

    /// Get the `settings` container.
    pub fn settings(&self) -> LoroMap {
        self.doc.get_map("settings")
    }

    /// The whole tree as a plain value (containers resolved recursively).
    pub fn deep_value(&self) -> loro::LoroValue {
        self.doc.get_deep_value()
    }

    /// Get current version vector (what this replica has already seen).
    pub fn version(&self) -> VersionVector {
        self.doc.state_vv()
    }

    /// Export full snapshot for persistence or session bootstrap.
    pub fn snapshot(&self) -> Vec<u8> {
        self.doc.export(ExportMode::Snapshot).unwrap()
    }

    /// Export the minimal update since a given version vector.
    pub fn diff(&self, since: &VersionVector) -> Vec<u8> {
        self.doc.export(ExportMode::updates(since)).unwrap()
    }

    /// Merge a remote update into local state.
    ///
    /// Malformed bytes are rejected without mutating state. Applying the
    /// same update twice is a no-op; applying concurrent updates in either
    /// order yields the same tree.
    ///
    /// Returns the set of logical changes for downstream consumers.
    pub fn apply(&mut self, update: &[u8]) -> Result<ChangeSet> {
        let before = codec::to_schema(self);
        self.doc
            .import(update)
            .map_err(|e| ReplicaError::Loro(e.to_string()))?;
        let after = codec::to_schema(self);
        Ok(ChangeSet::between(&before, &after))
    }

    /// Commit pending local changes.
    pub fn commit(&self) {
        self.doc.commit();
    }
}

/// Logical changes produced by one [`FormReplica::apply`] call.
///
/// Node ids are page ids, field ids, plus the [`LAYOUT_NODE`] and
/// [`SETTINGS_NODE`] pseudo-nodes for scalar property changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl ChangeSet {
    /// True when the update carried no visible change (e.g. a re-applied or
    /// already-seen update).
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Diff two decoded tree states into added/removed/modified node ids.
    pub fn between(before: &FormSchema, after: &FormSchema) -> Self {
        let mut set = ChangeSet::default();

        let before_pages: HashMap<&str, &crate::schema::Page> =
            before.pages.iter().map(|p| (p.id.as_str(), p)).collect();
        let after_pages: HashMap<&str, &crate::schema::Page> =
            after.pages.iter().map(|p| (p.id.as_str(), p)).collect();

        for page in &after.pages {
            match before_pages.get(page.id.as_str()) {
                None => set.added.push(page.id.clone()),
                Some(old) => {
                    let field_order_changed = old
                        .fields
                        .iter()
                        .map(|f| f.id())
                        .ne(page.fields.iter().map(|f| f.id()));
                    if old.title != page.title || old.order != page.order || field_order_changed {
                        set.modified.push(page.id.clone());
                    }
                }
            }
        }
        for page in &before.pages {
            if !after_pages.contains_key(page.id.as_str()) {
                set.removed.push(page.id.clone());
            }
        }

        let before_fields: HashMap<&str, &crate::schema::Field> = before
            .pages
            .iter()
            .flat_map(|p| p.fields.iter())
            .map(|f| (f.id(), f))
            .collect();
        let after_fields: HashMap<&str, &crate::schema::Field> = after
            .pages
            .iter()
            .flat_map(|p| p.fields.iter())
            .map(|f| (f.id(), f))
            .collect();

        for (id, field) in &after_fields {
            match before_fields.get(id) {
                None => set.added.push((*id).to_string()),
                Some(old) if old != field => set.modified.push((*id).to_string()),
                Some(_) => {}
            }
        }
        for id in before_fields.keys() {
            if !after_fields.contains_key(id) {
                set.removed.push(id.to_string());
            }
        }

        if before.layout != after.layout {
            set.modified.push(LAYOUT_NODE.to_string());
        }
        if before.is_shuffle_enabled != after.is_shuffle_enabled {
            set.modified.push(SETTINGS_NODE.to_string());
        }

        set
    }
}
