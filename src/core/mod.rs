//! Core orchestration logic.
//!
//! This module contains:
//! - RunStore: per-item event logs, snapshots and checkpoints
//! - Pipeline: settings and retry policies
//! - Scriptwriter / Synthesizer: style and TTS registries
//! - Orchestrator: the per-item state machine

pub mod cache;
pub mod errors;
pub mod locks;
pub mod orchestrator;
pub mod pipeline;
pub mod run_store;
pub mod scriptwriter;
pub mod synthesizer;

// Re-export commonly used types
pub use cache::ArtifactCache;
pub use errors::{
    ArchivalError, ExtractionError, ItemBusy, PipelineError, StageFailure, StyleTransformError,
    SummarizationError, SynthesisError,
};
pub use locks::{ItemLocks, ItemToken};
pub use orchestrator::{PipelineOrchestrator, PipelineStages, SourceReport};
pub use pipeline::{PipelineSettings, RetryPolicy, StageSettings};
pub use run_store::{generate_idempotency_key, Checkpoint, RunStore};
pub use scriptwriter::{Scriptwriter, StylePolicy, StyleRegistry};
pub use synthesizer::{BackendRegistry, Synthesizer};
