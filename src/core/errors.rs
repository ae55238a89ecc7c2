//! Error taxonomy for stage failures.
//!
//! Every error answers `is_transient()`: transient errors are retried with
//! backoff, everything else fails the run on the first attempt.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{AttachError, ContentId, Stage};

/// The raw payload holds no usable article
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("No article body: {chars} characters after cleanup, need at least {min}")]
    TooShort { chars: usize, min: usize },

    #[error("Unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("Payload is {actual} bytes, limit is {limit}")]
    PayloadTooLarge { actual: u64, limit: u64 },

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl ExtractionError {
    /// Re-running the same pure transformation gives the same answer
    pub fn is_transient(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SummarizationError {
    #[error("Summarization model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Summarizer returned no text")]
    EmptyOutput,

    #[error("Summary is {actual} characters, bound is {max}")]
    LengthExceeded { actual: usize, max: usize },

    #[error("Summarizer rejected the request: {0}")]
    Rejected(String),
}

impl SummarizationError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StyleTransformError {
    #[error("Narrative style '{0}' is not registered")]
    Unregistered(String),

    #[error("Summary is empty")]
    EmptySummary,
}

impl StyleTransformError {
    pub fn is_transient(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthesisError {
    #[error("TTS backend '{0}' is not registered")]
    UnregisteredBackend(String),

    #[error("Backend '{backend}' cannot speak language '{language}' with voice '{voice}'")]
    UnsupportedVoice {
        backend: String,
        language: String,
        voice: String,
    },

    #[error("TTS backend unavailable: {0}")]
    Unavailable(String),

    #[error("TTS backend rate limited the request")]
    RateLimited,

    #[error("Audio is {duration:.2}s, expected between {min:.2}s and {max:.2}s")]
    DurationOutOfBounds { duration: f64, min: f64, max: f64 },

    #[error("Backend returned unreadable audio: {0}")]
    InvalidAudio(String),

    #[error("TTS backend rejected the request: {0}")]
    Rejected(String),
}

impl SynthesisError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::RateLimited
                | Self::DurationOutOfBounds { .. }
                | Self::InvalidAudio(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ArchivalError {
    #[error("Archive IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive rejected the episode: {0}")]
    Rejected(String),

    #[error("Failed to encode episode metadata: {0}")]
    Encoding(String),
}

impl ArchivalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Why a single stage attempt failed
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Summarization(#[from] SummarizationError),

    #[error(transparent)]
    Style(#[from] StyleTransformError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Archival(#[from] ArchivalError),

    #[error("Stage timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Failed to persist stage output: {0}")]
    Storage(String),

    #[error(transparent)]
    Attach(#[from] AttachError),
}

impl StageFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Extraction(e) => e.is_transient(),
            Self::Summarization(e) => e.is_transient(),
            Self::Style(e) => e.is_transient(),
            Self::Synthesis(e) => e.is_transient(),
            Self::Archival(e) => e.is_transient(),
            Self::Timeout(_) | Self::Storage(_) => true,
            Self::Attach(_) => false,
        }
    }
}

/// A run that ended Failed, as reported to the caller
#[derive(Debug, Error)]
#[error("Item {item_id} failed at {stage}: {source}")]
pub struct PipelineError {
    pub item_id: ContentId,
    pub stage: Stage,
    pub source: StageFailure,
}

impl PipelineError {
    pub fn new(item_id: ContentId, stage: Stage, source: StageFailure) -> Self {
        Self {
            item_id,
            stage,
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}

/// Another worker (in this process or another) owns the item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Item {0} is already being processed")]
pub struct ItemBusy(pub ContentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StageFailure::from(SummarizationError::LengthExceeded { actual: 500, max: 200 })
            .is_transient());
        assert!(StageFailure::from(SynthesisError::RateLimited).is_transient());
        assert!(StageFailure::Timeout(Duration::from_secs(5)).is_transient());

        assert!(!StageFailure::from(ExtractionError::TooShort { chars: 5, min: 20 }).is_transient());
        assert!(!StageFailure::from(StyleTransformError::Unregistered("noir".into())).is_transient());
        assert!(!StageFailure::from(SynthesisError::UnregisteredBackend("x".into())).is_transient());
    }

    #[test]
    fn test_pipeline_error_message() {
        let id = ContentId::parse("0123456789abcdef").unwrap();
        let err = PipelineError::new(
            id,
            Stage::Summarizing,
            SummarizationError::LengthExceeded { actual: 500, max: 200 }.into(),
        );

        assert_eq!(
            err.to_string(),
            "Item 0123456789abcdef failed at summarizing: Summary is 500 characters, bound is 200"
        );
        assert!(err.is_transient());
    }
}
