//! Stage interfaces and their built-in implementations.
//!
//! Every stage that talks to something outside the process sits behind a
//! trait here, so implementations can be swapped (and mocked in tests)
//! without touching the orchestrator.

pub mod archive;
pub mod espeak;
pub mod extractor;
pub mod ollama;
pub mod silence;
pub mod source;
pub mod speech_http;
pub mod summarizer;
pub mod wav;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::core::errors::{ArchivalError, ExtractionError, SummarizationError, SynthesisError};
use crate::domain::{
    AudioAsset, ContentId, ContentItem, ExtractedText, NarrativeStyle, Publication, Summary,
    TtsBackendId, VoiceConfig,
};

pub use archive::LibraryArchiver;
pub use espeak::EspeakBackend;
pub use extractor::HtmlExtractor;
pub use ollama::OllamaSummarizer;
pub use silence::SilenceBackend;
pub use source::{JsonlSource, VecSource};
pub use speech_http::HttpSpeechBackend;
pub use summarizer::ExtractiveSummarizer;

/// Yields raw articles.
///
/// The stream may be infinite; the orchestrator pulls at its own pace. A bad
/// record is yielded as an error and does not end the stream.
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn items(&self) -> BoxStream<'static, anyhow::Result<ContentItem>>;
}

/// Cleans raw payloads into normalized text
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        raw_payload: &str,
        source_url: &str,
        declared_language: Option<&str>,
    ) -> Result<ExtractedText, ExtractionError>;
}

/// Produces a neutral summary no longer than `max_chars`
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Model name recorded on every Summary
    fn name(&self) -> &str;

    async fn summarize(
        &self,
        text: &ExtractedText,
        max_chars: usize,
    ) -> Result<Summary, SummarizationError>;
}

/// What a TTS backend is asked to speak
#[derive(Debug, Clone)]
pub struct SpeechRequest<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub voice: &'a VoiceConfig,

    /// Pace requested by the narrative style (or the voice override)
    pub words_per_minute: u32,
}

/// Audio returned by a backend
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub data: Vec<u8>,
    pub format: String,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

/// Expected seconds of audio per character of script
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationBounds {
    pub min_secs_per_char: f64,
    pub max_secs_per_char: f64,

    /// Fixed allowance for leading/trailing silence
    pub slack_secs: f64,
}

impl Default for DurationBounds {
    fn default() -> Self {
        Self {
            min_secs_per_char: 0.02,
            max_secs_per_char: 0.25,
            slack_secs: 1.5,
        }
    }
}

impl DurationBounds {
    /// Allowed (min, max) duration for a text of `chars` characters
    pub fn range(&self, chars: usize) -> (f64, f64) {
        let chars = chars as f64;
        let min = (chars * self.min_secs_per_char - self.slack_secs).max(0.0);
        let max = chars * self.max_secs_per_char + self.slack_secs;
        (min, max)
    }

    pub fn check(&self, chars: usize, duration_secs: f64) -> Result<(), SynthesisError> {
        let (min, max) = self.range(chars);
        if duration_secs <= 0.0 || duration_secs < min || duration_secs > max {
            return Err(SynthesisError::DurationOutOfBounds {
                duration: duration_secs,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Text-to-speech engine
#[async_trait]
pub trait TtsBackend: Send + Sync {
    fn id(&self) -> TtsBackendId;

    /// Whether the backend can speak `language` with this voice
    fn supports(&self, language: &str, voice: &VoiceConfig) -> bool;

    fn duration_bounds(&self) -> DurationBounds {
        DurationBounds::default()
    }

    async fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SynthesisError>;
}

/// Metadata handed to the archiver with the audio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub item_id: ContentId,
    pub title: Option<String>,
    pub source_url: String,
    pub article_published_at: DateTime<Utc>,
    pub language: String,
    pub style: NarrativeStyle,
    pub backend: TtsBackendId,
    pub voice: String,
    pub duration_secs: f64,
    pub format: String,

    /// Narration that was spoken; stored beside the audio, not in the metadata
    #[serde(skip)]
    pub script_text: Option<String>,
}

impl EpisodeMetadata {
    /// Collect metadata from an item whose audio is attached
    pub fn from_item(item: &ContentItem, audio: &AudioAsset) -> Self {
        let script = item.script();
        Self {
            item_id: item.id().clone(),
            title: item.title().map(str::to_string),
            source_url: item.source_url().to_string(),
            article_published_at: item.published_at(),
            language: script
                .map(|s| s.language.clone())
                .or_else(|| item.extracted().map(|e| e.language.clone()))
                .unwrap_or_default(),
            style: script.map(|s| s.style.clone()).unwrap_or_default(),
            backend: audio.backend.clone(),
            voice: audio.voice.clone(),
            duration_secs: audio.duration_secs,
            format: audio.format.clone(),
            script_text: script.map(|s| s.text.clone()),
        }
    }
}

/// Persists finished episodes
#[async_trait]
pub trait Archiver: Send + Sync {
    fn name(&self) -> &str;

    /// Store the episode and return where it can be found
    async fn archive(
        &self,
        audio: &AudioAsset,
        metadata: &EpisodeMetadata,
    ) -> Result<Publication, ArchivalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        let bounds = DurationBounds::default();

        // 300 chars at ~15 chars/sec is about 20s
        assert!(bounds.check(300, 20.0).is_ok());
        assert!(bounds.check(300, 0.0).is_err());
        assert!(bounds.check(300, 120.0).is_err());
        assert!(bounds.check(300, 2.0).is_err());
        // Short texts get the fixed slack
        assert!(bounds.check(5, 1.2).is_ok());
    }
}
