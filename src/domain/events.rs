//! Event types for the per-item run log.
//!
//! All state changes are recorded as immutable events in an append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::ContentId;
use super::run::{RunOptions, Stage};

/// A single event in the append-only event log.
///
/// Events are the source of truth for run state. The current state of any run
/// can be reconstructed by replaying its events in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The content item this event belongs to
    pub item_id: ContentId,

    /// Stage this event concerns (if applicable)
    pub stage: Option<Stage>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{item_id}:{stage}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets)
    pub payload_summary: String,

    /// Current status of the stage/run
    pub status: StageStatus,

    /// Attempt number for stage events (1-indexed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for completed stages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Output reference for completed stages, publication reference for runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Options the run was started with (RunStarted only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RunOptions>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        item_id: ContentId,
        stage: Option<Stage>,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            item_id,
            stage,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            attempt: None,
            duration_ms: None,
            error: None,
            reference: None,
            options: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_reference(mut self, reference: String) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Types of events that can occur while processing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The item entered the pipeline
    RunStarted,

    /// A failed or cancelled run was picked up again
    RunResumed,

    /// The archiver confirmed the episode
    RunPublished,

    /// The run failed permanently at some stage
    RunFailed,

    /// The run was stopped at a stage boundary
    RunCancelled,

    /// A stage has started an attempt
    StageStarted,

    /// A stage output was attached and persisted
    StageCompleted,

    /// A stage failed (no more retries)
    StageFailed,

    /// A stage attempt failed and will be retried
    StageRetrying,
}

/// Status of a stage or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (output already attached or cached)
    Skipped,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item_id() -> ContentId {
        let published = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ContentId::derive("https://example.com/a", &published)
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            item_id(),
            Some(Stage::Summarizing),
            EventType::StageStarted,
            "test-key".to_string(),
            "Starting summarizing".to_string(),
            StageStatus::Running,
        )
        .with_attempt(1);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::StageStarted);
        assert_eq!(parsed.status, StageStatus::Running);
        assert_eq!(parsed.stage, Some(Stage::Summarizing));
        assert_eq!(parsed.attempt, Some(1));
        assert!(!json.contains("duration_ms"));
    }

    #[test]
    fn test_event_with_error() {
        let event = Event::new(
            item_id(),
            Some(Stage::Synthesizing),
            EventType::StageFailed,
            "test-key".to_string(),
            "Failed synthesizing".to_string(),
            StageStatus::Failed,
        )
        .with_duration(1500)
        .with_error("Connection timeout".to_string());

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error, Some("Connection timeout".to_string()));
    }
}
