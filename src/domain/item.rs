//! Content items and the outputs each stage attaches to them.
//!
//! A `ContentItem` is created by a source adapter and then only grows: each
//! stage attaches exactly one output, in pipeline order, and nothing attached
//! is ever replaced.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::run::Stage;
use super::style::{NarrativeStyle, TtsBackendId};

/// Content identifier (SHA256(url + published_at)[0:16])
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Derive the identifier of an article from its URL and publish time.
    ///
    /// Re-fetching the same article yields the same identifier, which is how
    /// duplicates are recognized.
    pub fn derive(url: &str, published_at: &DateTime<Utc>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(
            published_at
                .to_rfc3339_opts(SecondsFormat::Secs, true)
                .as_bytes(),
        );
        let result = hasher.finalize();

        // Take first 8 bytes (16 hex chars)
        Self(hex::encode(&result[..8]))
    }

    /// Wrap an identifier read back from storage or the command line
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() == 16 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when attaching a stage output to an item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("{stage} output is already attached")]
    AlreadyAttached { stage: Stage },

    #[error("{stage} requires the {requires} output, which is missing")]
    MissingUpstream { stage: Stage, requires: Stage },

    #[error("item is archived and can no longer change")]
    Archived,
}

/// One news article tracked through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    id: ContentId,
    source_url: String,
    raw_payload: String,
    published_at: DateTime<Utc>,

    #[serde(default)]
    title: Option<String>,

    /// Language declared by the source, if any
    #[serde(default)]
    language: Option<String>,

    #[serde(default)]
    extracted: Option<ExtractedText>,

    #[serde(default)]
    summary: Option<Summary>,

    #[serde(default)]
    script: Option<Script>,

    #[serde(default)]
    audio: Option<AudioAsset>,

    #[serde(default)]
    publication: Option<Publication>,
}

impl ContentItem {
    /// Create a new item; the identifier is derived from URL and publish time
    pub fn new(
        source_url: impl Into<String>,
        raw_payload: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let source_url = source_url.into();
        Self {
            id: ContentId::derive(&source_url, &published_at),
            source_url,
            raw_payload: raw_payload.into(),
            published_at,
            title: None,
            language: None,
            extracted: None,
            summary: None,
            script: None,
            audio: None,
            publication: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn id(&self) -> &ContentId {
        &self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn extracted(&self) -> Option<&ExtractedText> {
        self.extracted.as_ref()
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn audio(&self) -> Option<&AudioAsset> {
        self.audio.as_ref()
    }

    pub fn publication(&self) -> Option<&Publication> {
        self.publication.as_ref()
    }

    /// Whether the item has been handed to the archiver and confirmed
    pub fn is_archived(&self) -> bool {
        self.publication.is_some()
    }

    /// Whether the output of `stage` is already attached
    pub fn has_output(&self, stage: Stage) -> bool {
        match stage {
            Stage::Extracting => self.extracted.is_some(),
            Stage::Summarizing => self.summary.is_some(),
            Stage::Scripting => self.script.is_some(),
            Stage::Synthesizing => self.audio.is_some(),
            Stage::Archiving => self.publication.is_some(),
        }
    }

    /// Check the preconditions shared by every mutator
    fn check_attach(&self, stage: Stage) -> Result<(), AttachError> {
        if self.is_archived() {
            return Err(AttachError::Archived);
        }
        if self.has_output(stage) {
            return Err(AttachError::AlreadyAttached { stage });
        }
        if let Some(requires) = stage.previous() {
            if !self.has_output(requires) {
                return Err(AttachError::MissingUpstream { stage, requires });
            }
        }
        Ok(())
    }

    pub fn attach_extracted(&mut self, extracted: ExtractedText) -> Result<(), AttachError> {
        self.check_attach(Stage::Extracting)?;
        self.extracted = Some(extracted);
        Ok(())
    }

    pub fn attach_summary(&mut self, summary: Summary) -> Result<(), AttachError> {
        self.check_attach(Stage::Summarizing)?;
        self.summary = Some(summary);
        Ok(())
    }

    pub fn attach_script(&mut self, script: Script) -> Result<(), AttachError> {
        self.check_attach(Stage::Scripting)?;
        self.script = Some(script);
        Ok(())
    }

    pub fn attach_audio(&mut self, audio: AudioAsset) -> Result<(), AttachError> {
        self.check_attach(Stage::Synthesizing)?;
        self.audio = Some(audio);
        Ok(())
    }

    pub fn attach_publication(&mut self, publication: Publication) -> Result<(), AttachError> {
        self.check_attach(Stage::Archiving)?;
        self.publication = Some(publication);
        Ok(())
    }

    /// Attach whichever output a stage produced
    pub fn attach(&mut self, output: StageOutput) -> Result<(), AttachError> {
        match output {
            StageOutput::Extracted(v) => self.attach_extracted(v),
            StageOutput::Summary(v) => self.attach_summary(v),
            StageOutput::Script(v) => self.attach_script(v),
            StageOutput::Audio(v) => self.attach_audio(v),
            StageOutput::Published(v) => self.attach_publication(v),
        }
    }

    /// Restore audio bytes that are stored beside the item snapshot
    pub(crate) fn restore_audio_data(&mut self, data: Vec<u8>) {
        if let Some(audio) = self.audio.as_mut() {
            audio.data = data;
        }
    }
}

/// The output of one stage, before it is attached
#[derive(Debug, Clone)]
pub enum StageOutput {
    Extracted(ExtractedText),
    Summary(Summary),
    Script(Script),
    Audio(AudioAsset),
    Published(Publication),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Extracted(_) => Stage::Extracting,
            Self::Summary(_) => Stage::Summarizing,
            Self::Script(_) => Stage::Scripting,
            Self::Audio(_) => Stage::Synthesizing,
            Self::Published(_) => Stage::Archiving,
        }
    }

    /// Short reference recorded in the checkpoint for this output
    pub fn reference(&self) -> String {
        match self {
            Self::Extracted(v) => format!("text:{}", v.content_hash()),
            Self::Summary(v) => format!("summary:{}", hash_text(&v.text)),
            Self::Script(v) => format!("script:{}", v.content_hash()),
            Self::Audio(v) => format!("audio:{}", hash_bytes(&v.data)),
            Self::Published(v) => v.reference.clone(),
        }
    }
}

/// Normalized article text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,

    /// Language tag (e.g. "en")
    pub language: String,

    /// Share of the raw payload that survived cleaning (0.0..=1.0)
    pub confidence: f32,

    pub char_count: usize,
    pub word_count: usize,
}

impl ExtractedText {
    pub fn new(text: String, language: impl Into<String>, confidence: f32) -> Self {
        let char_count = text.chars().count();
        let word_count = text.split_whitespace().count();
        Self {
            text,
            language: language.into(),
            confidence: confidence.clamp(0.0, 1.0),
            char_count,
            word_count,
        }
    }

    pub fn content_hash(&self) -> String {
        hash_text(&self.text)
    }
}

/// A neutral condensed summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,

    /// Upper bound (in characters) the summary was requested with
    pub max_chars: usize,

    /// Content hash of the ExtractedText it was produced from
    pub source_hash: String,

    /// Summarizer that produced it
    pub model: String,
}

impl Summary {
    pub fn new(text: String, max_chars: usize, source: &ExtractedText, model: impl Into<String>) -> Self {
        Self {
            text,
            max_chars,
            source_hash: source.content_hash(),
            model: model.into(),
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn within_bound(&self) -> bool {
        self.char_count() <= self.max_chars
    }
}

/// Styled narrative text ready to be spoken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub text: String,
    pub style: NarrativeStyle,

    /// Content hash of the Summary text it was derived from
    pub summary_hash: String,

    pub language: String,

    /// Speaking pace the style asks for
    pub words_per_minute: u32,

    pub word_count: usize,
    pub estimated_duration_secs: u32,
}

impl Script {
    pub fn content_hash(&self) -> String {
        hash_text(&self.text)
    }
}

/// Synthesized audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAsset {
    /// Encoded audio; stored beside the item snapshot rather than inside it
    #[serde(skip)]
    pub data: Vec<u8>,

    /// Container format (e.g. "wav")
    pub format: String,

    pub duration_secs: f64,
    pub sample_rate: u32,

    /// Content hash of the Script that was spoken
    pub script_hash: String,

    pub backend: TtsBackendId,
    pub voice: String,
}

/// Confirmation returned by the archiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Where the episode can be found (path, URL, feed guid...)
    pub reference: String,
    pub published_at: DateTime<Utc>,
}

/// Hash text content (first 16 hex chars of SHA256)
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// Hash raw bytes (first 16 hex chars of SHA256)
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
