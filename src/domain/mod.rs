//! Domain types for the newspeaker pipeline.
//!
//! This module contains the core data structures:
//! - Item: the article and the outputs each stage attaches to it
//! - Style: narrative style and TTS backend names
//! - Events: Immutable records of state changes
//! - Run: per-item execution state

pub mod events;
pub mod item;
pub mod run;
pub mod style;

// Re-export commonly used types
pub use events::{Event, EventType, StageStatus};
pub use item::{
    hash_bytes, hash_text, AttachError, AudioAsset, ContentId, ContentItem, ExtractedText,
    Publication, Script, StageOutput, Summary,
};
pub use run::{PipelineRun, RunOptions, RunState, Stage, StageOutcome};
pub use style::{NarrativeStyle, TtsBackendId, VoiceConfig};
