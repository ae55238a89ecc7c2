//! Content-addressed cache of expensive stage outputs.
//!
//! Summaries, scripts and audio are keyed by stage + inputs + parameters, so
//! a different item with identical text, or a rerun after the run directory
//! was removed, does not pay for the NLP/TTS work twice.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use super::run_store::write_atomic;
use crate::domain::{hash_text, AudioAsset, Stage};

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache at the configured location (~/.newspeaker/cache)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::cache_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache key for a stage over its inputs and parameters
    pub fn key(stage: Stage, parts: &[&str]) -> String {
        let mut material = String::from(stage.as_str());
        for part in parts {
            material.push('\u{1f}');
            material.push_str(part);
        }
        hash_text(&material)
    }

    fn entry_path(&self, stage: Stage, key: &str, extension: &str) -> PathBuf {
        self.root
            .join(stage.as_str())
            .join(format!("{}.{}", key, extension))
    }

    /// Look up a cached value; unreadable entries count as misses
    pub async fn get<T: DeserializeOwned>(&self, stage: Stage, key: &str) -> Option<T> {
        let path = self.entry_path(stage, key, "json");
        let content = fs::read(&path).await.ok()?;

        match serde_json::from_slice(&content) {
            Ok(value) => {
                debug!(stage = %stage, key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, stage: Stage, key: &str, value: &T) -> Result<()> {
        let path = self.entry_path(stage, key, "json");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }

        let json = serde_json::to_vec(value).context("Failed to serialize cache entry")?;
        write_atomic(&path, &json).await
    }

    /// Audio metadata lives in JSON, the payload beside it
    pub async fn get_audio(&self, key: &str) -> Option<AudioAsset> {
        let mut audio: AudioAsset = self.get(Stage::Synthesizing, key).await?;
        let data = fs::read(self.entry_path(Stage::Synthesizing, key, "bin"))
            .await
            .ok()?;
        audio.data = data;
        Some(audio)
    }

    pub async fn put_audio(&self, key: &str, audio: &AudioAsset) -> Result<()> {
        let bin_path = self.entry_path(Stage::Synthesizing, key, "bin");
        if let Some(parent) = bin_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }

        // Payload first: a JSON entry without its payload would be a miss anyway
        write_atomic(&bin_path, &audio.data).await?;
        self.put(Stage::Synthesizing, key, audio).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TtsBackendId;
    use tempfile::TempDir;

    #[test]
    fn test_key_depends_on_stage_and_params() {
        let a = ArtifactCache::key(Stage::Summarizing, &["text", "200"]);
        let b = ArtifactCache::key(Stage::Summarizing, &["text", "300"]);
        let c = ArtifactCache::key(Stage::Scripting, &["text", "200"]);
        let d = ArtifactCache::key(Stage::Summarizing, &["text2", "00"]);

        assert_eq!(a, ArtifactCache::key(Stage::Summarizing, &["text", "200"]));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let key = ArtifactCache::key(Stage::Summarizing, &["abc"]);

        assert!(cache.get::<String>(Stage::Summarizing, &key).await.is_none());

        cache
            .put(Stage::Summarizing, &key, &"Markets rose today.".to_string())
            .await
            .unwrap();
        let hit: Option<String> = cache.get(Stage::Summarizing, &key).await;
        assert_eq!(hit.as_deref(), Some("Markets rose today."));
    }

    #[tokio::test]
    async fn test_audio_roundtrip() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let audio = AudioAsset {
            data: vec![9; 64],
            format: "wav".to_string(),
            duration_secs: 2.0,
            sample_rate: 16000,
            script_hash: "0011223344556677".to_string(),
            backend: TtsBackendId::Silence,
            voice: "default".to_string(),
        };

        cache.put_audio("k1", &audio).await.unwrap();
        assert_eq!(cache.get_audio("k1").await, Some(audio));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp.path());
        let dir = temp.path().join("scripting");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.json"), b"{not json").unwrap();

        assert!(cache.get::<String>(Stage::Scripting, "bad").await.is_none());
    }
}
