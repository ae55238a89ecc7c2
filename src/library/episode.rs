//! Episode storage for the library.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::catalog::{Catalog, CatalogEntry};
use crate::adapters::EpisodeMetadata;
use crate::core::run_store::write_atomic;
use crate::domain::ContentId;

/// What `metadata.json` holds for each episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    #[serde(flatten)]
    pub metadata: EpisodeMetadata,

    /// Audio file name inside the episode directory
    pub audio_file: String,

    pub archived_at: DateTime<Utc>,
}

/// The library directory and its catalog
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Library at the configured location (~/.newspeaker/library or $NEWSPEAKER_LIBRARY)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::library_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    /// Get the episode directory for an item
    pub fn episode_dir(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn metadata_path(&self, id: &ContentId) -> PathBuf {
        self.episode_dir(id).join("metadata.json")
    }

    /// Ensure the episode directory exists
    pub async fn ensure_dir(&self, id: &ContentId) -> Result<PathBuf> {
        let dir = self.episode_dir(id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create episode directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Write audio, script and metadata, then index the episode.
    ///
    /// Returns the path of the audio file.
    pub async fn store_episode(
        &self,
        audio: &[u8],
        script: Option<&str>,
        metadata: &EpisodeMetadata,
    ) -> Result<PathBuf> {
        let dir = self.ensure_dir(&metadata.item_id).await?;
        let audio_file = format!("episode.{}", metadata.format);
        let audio_path = dir.join(&audio_file);

        write_atomic(&audio_path, audio).await?;
        if let Some(script) = script {
            write_atomic(&dir.join("script.txt"), script.as_bytes()).await?;
        }

        let record = EpisodeRecord {
            metadata: metadata.clone(),
            audio_file: audio_file.clone(),
            archived_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record).context("Failed to serialize episode metadata")?;
        write_atomic(&self.metadata_path(&metadata.item_id), &json).await?;

        let entry = CatalogEntry {
            id: metadata.item_id.clone(),
            title: metadata
                .title
                .clone()
                .unwrap_or_else(|| metadata.source_url.clone()),
            url: metadata.source_url.clone(),
            style: metadata.style.clone(),
            backend: metadata.backend.clone(),
            language: metadata.language.clone(),
            duration_secs: metadata.duration_secs,
            audio_path: format!("{}/{}", metadata.item_id, audio_file),
            archived_at: record.archived_at,
        };
        let catalog_path = self.catalog_path();
        tokio::task::spawn_blocking(move || Catalog::update(&catalog_path, |c| c.add(entry)))
            .await
            .context("Catalog update task panicked")??;

        Ok(audio_path)
    }

    /// Load metadata from disk
    pub async fn load_record(&self, id: &ContentId) -> Result<Option<EpisodeRecord>> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read metadata: {}", path.display()))?;

        serde_json::from_str(&content)
            .map(Some)
            .context("Failed to parse metadata JSON")
    }

    /// Check if an episode exists in the library
    pub fn exists(&self, id: &ContentId) -> bool {
        self.metadata_path(id).exists()
    }

    pub async fn catalog(&self) -> Result<Catalog> {
        let path = self.catalog_path();
        tokio::task::spawn_blocking(move || Catalog::load(&path))
            .await
            .context("Catalog load task panicked")?
    }
}
