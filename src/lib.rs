//! newspeaker - Resumable news-to-audio pipeline orchestrator
//!
//! Turns news articles into narrated audio episodes: each article is
//! extracted, summarized, rewritten as a script in a narrative style,
//! synthesized to speech and archived in a local library.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - Every stage transition is recorded as an immutable event per item
//! - Current state is derived by replaying events
//! - Failed runs can be resumed at the stage that failed, reusing every
//!   output already attached to the item
//!
//! # Modules
//!
//! - `adapters`: Stage interfaces and their implementations (HTML extraction,
//!   Ollama, espeak-ng, HTTP speech, library archiver, JSONL source)
//! - `core`: Orchestration logic (RunStore, retry policies, registries)
//! - `domain`: Data structures (ContentItem, Event, PipelineRun)
//! - `library`: Published episodes and their catalog
//! - `text`: Text cleanup shared by the stages
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Turn a news feed into episodes
//! newspeaker run --input news.jsonl --style conversational
//!
//! # Check an item's run
//! newspeaker status <item-id>
//!
//! # Resume a failed run
//! newspeaker resume <item-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod library;
pub mod text;

// Re-export main types at crate root for convenience
pub use crate::core::{PipelineError, PipelineOrchestrator, PipelineSettings, PipelineStages};
pub use domain::{ContentId, ContentItem, Event, EventType, PipelineRun, RunState, Stage};
pub use library::{Catalog, Library};
