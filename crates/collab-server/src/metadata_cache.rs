//! Persistence for derived form metadata.
//!
//! Stores the metadata summaries extracted by the debounce scheduler so
//! listing/dashboard reads survive restarts. Entries live in
//! `metadata.json` within the data directory. The cache is written only by
//! the scheduler; everyone else reads.

use anyhow::Result;
use collab_core::metadata::FormMetadata;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File-backed metadata cache keyed by form id.
pub struct MetadataCache {
    /// Path to the storage file; None for a purely in-memory cache.
    path: Option<PathBuf>,
    /// In-memory entries.
    entries: HashMap<String, FormMetadata>,
}

impl MetadataCache {
    /// Create a cache persisted to `metadata.json` in the data directory.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("metadata.json");

        let mut cache = Self {
            path: Some(path),
            entries: HashMap::new(),
        };

        // Try to load existing data
        if let Ok(loaded) = cache.load() {
            cache.entries = loaded;
        }

        Ok(cache)
    }

    /// Create a cache that lives only in memory (tests).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
        }
    }

    /// Load entries from disk.
    fn load(&self) -> Result<HashMap<String, FormMetadata>> {
        let Some(path) = &self.path else {
            return Ok(HashMap::new());
        };
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let contents = fs::read_to_string(path)?;
        let entries: HashMap<String, FormMetadata> = serde_json::from_str(&contents)?;
        Ok(entries)
    }

    /// Save current entries to disk.
    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Add or replace the entry for a form.
    pub fn upsert(&mut self, entry: FormMetadata) -> Result<()> {
        self.entries.insert(entry.form_id.clone(), entry);
        self.save()
    }

    /// Get the entry for a form.
    pub fn get(&self, form_id: &str) -> Option<&FormMetadata> {
        self.entries.get(form_id)
    }

    /// All entries (listing/dashboard reads).
    pub fn all(&self) -> impl Iterator<Item = &FormMetadata> {
        self.entries.values()
    }
}
