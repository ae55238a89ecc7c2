//! Catalog of published episodes.
//!
//! Simple JSON-based index that can be searched and filtered. Updates go
//! through `Catalog::update`, which holds an exclusive lock on the catalog
//! while it reads, edits and rewrites it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::domain::{ContentId, NarrativeStyle, TtsBackendId};

/// Catalog of all published episodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    /// Catalog format version
    pub version: u32,

    /// All cataloged episodes
    pub episodes: Vec<CatalogEntry>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            version: 1,
            episodes: Vec::new(),
        }
    }

    /// Load the catalog at `path` (empty if it does not exist yet)
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse catalog JSON")
    }

    /// Write the catalog to `path` via a temp file
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write catalog: {}", path.display()))?;

        Ok(())
    }

    /// Load, edit and save the catalog under an exclusive lock
    pub fn update<F>(path: &Path, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Catalog),
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open catalog lock: {}", lock_path.display()))?;

        // Acquire exclusive lock
        lock.lock_exclusive()
            .context("Failed to acquire file lock on catalog")?;

        let mut catalog = Self::load(path)?;
        edit(&mut catalog);
        catalog.save(path)

        // Lock is released when the file is dropped
    }

    /// Add an entry, replacing any previous entry for the same item
    pub fn add(&mut self, entry: CatalogEntry) {
        if let Some(existing) = self.episodes.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            self.episodes.push(entry);
        }
    }

    /// Get an entry by ID
    pub fn get(&self, id: &ContentId) -> Option<&CatalogEntry> {
        self.episodes.iter().find(|e| &e.id == id)
    }

    pub fn remove(&mut self, id: &ContentId) -> Option<CatalogEntry> {
        let pos = self.episodes.iter().position(|e| &e.id == id)?;
        Some(self.episodes.remove(pos))
    }

    /// Search episodes by query (case-insensitive substring match)
    pub fn search(&self, query: &str) -> Vec<&CatalogEntry> {
        let query_lower = query.to_lowercase();

        self.episodes
            .iter()
            .filter(|entry| {
                entry.title.to_lowercase().contains(&query_lower)
                    || entry.url.to_lowercase().contains(&query_lower)
            })
            .collect()
    }

    pub fn filter_by_style(&self, style: &NarrativeStyle) -> Vec<&CatalogEntry> {
        self.episodes.iter().filter(|e| &e.style == style).collect()
    }

    /// Get all episodes, most recently archived first
    pub fn list(&self, limit: Option<usize>) -> Vec<&CatalogEntry> {
        let mut episodes: Vec<_> = self.episodes.iter().collect();
        episodes.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));

        if let Some(limit) = limit {
            episodes.truncate(limit);
        }

        episodes
    }

    /// Total spoken time across the catalog
    pub fn total_duration_secs(&self) -> f64 {
        self.episodes.iter().map(|e| e.duration_secs).sum()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

/// A single episode in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: ContentId,

    /// Article title (or the URL when the source had none)
    pub title: String,

    /// Original source URL
    pub url: String,

    pub style: NarrativeStyle,
    pub backend: TtsBackendId,
    pub language: String,
    pub duration_secs: f64,

    /// Audio file, relative to the library root
    pub audio_path: String,

    pub archived_at: DateTime<Utc>,
}
