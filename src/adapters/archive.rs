//! Archiver that files episodes into the local library.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::{Archiver, EpisodeMetadata};
use crate::core::errors::ArchivalError;
use crate::domain::{AudioAsset, Publication};
use crate::library::Library;

#[derive(Debug, Clone)]
pub struct LibraryArchiver {
    library: Library,
}

impl LibraryArchiver {
    pub fn new(library: Library) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }
}

#[async_trait]
impl Archiver for LibraryArchiver {
    fn name(&self) -> &str {
        "library"
    }

    async fn archive(
        &self,
        audio: &AudioAsset,
        metadata: &EpisodeMetadata,
    ) -> Result<Publication, ArchivalError> {
        if audio.data.is_empty() {
            return Err(ArchivalError::Rejected("audio payload is empty".to_string()));
        }

        let path = self
            .library
            .store_episode(&audio.data, metadata.script_text.as_deref(), metadata)
            .await
            .map_err(|e| ArchivalError::Io(std::io::Error::other(format!("{:#}", e))))?;

        info!(item_id = %metadata.item_id, path = %path.display(), "Episode archived");
        Ok(Publication {
            reference: path.display().to_string(),
            published_at: Utc::now(),
        })
    }
}
