//! Run state and reconstruction from events.
//!
//! A `PipelineRun` is the execution record of one content item. It is never
//! mutated directly by the orchestrator: every change is an `Event` that is
//! appended to the log and then applied here, so replaying the log always
//! reproduces the same record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{Event, EventType, StageStatus};
use super::item::ContentId;
use super::style::{NarrativeStyle, TtsBackendId, VoiceConfig};

/// One pipeline transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Summarizing,
    Scripting,
    Synthesizing,
    Archiving,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 5] = [
        Stage::Extracting,
        Stage::Summarizing,
        Stage::Scripting,
        Stage::Synthesizing,
        Stage::Archiving,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Summarizing => "summarizing",
            Stage::Scripting => "scripting",
            Stage::Synthesizing => "synthesizing",
            Stage::Archiving => "archiving",
        }
    }

    /// The stage whose output this one consumes
    pub fn previous(&self) -> Option<Stage> {
        let idx = self.index();
        idx.checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn next(&self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("Unknown stage: {}", s))
    }
}

/// Per-run choices that must survive a resume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub style: NarrativeStyle,

    #[serde(default)]
    pub backend: TtsBackendId,

    #[serde(default)]
    pub voice: VoiceConfig,
}

/// Outcome of a single stage within a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub status: StageStatus,

    /// Attempts made in the most recent execution
    pub attempts: u32,

    pub error: Option<String>,

    /// Reference to the attached output
    pub reference: Option<String>,

    pub completed_at: Option<DateTime<Utc>>,
}

/// The execution record of one content item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Item this run belongs to
    pub item_id: ContentId,

    /// Current state of the run
    pub state: RunState,

    pub options: RunOptions,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Time of the last applied event
    pub updated_at: DateTime<Utc>,

    /// When the run reached Published or Failed (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Outcome of each stage that has been attempted
    pub outcomes: BTreeMap<Stage, StageOutcome>,

    /// Retries per stage, accumulated across resumes
    pub retry_counts: BTreeMap<Stage, u32>,

    /// How many times the run was resumed
    pub resumes: u32,
}

impl PipelineRun {
    /// Create a new run for an item
    pub fn new(item_id: ContentId, options: RunOptions) -> Self {
        let now = Utc::now();
        Self {
            item_id,
            state: RunState::Pending,
            options,
            started_at: now,
            updated_at: now,
            completed_at: None,
            outcomes: BTreeMap::new(),
            retry_counts: BTreeMap::new(),
            resumes: 0,
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.item_id.clone(), RunOptions::default());
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        self.updated_at = event.timestamp;

        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Pending;
                self.started_at = event.timestamp;
                if let Some(ref options) = event.options {
                    self.options = options.clone();
                }
            }
            EventType::RunResumed => {
                if let Some(stage) = event.stage {
                    self.state = RunState::at(stage);
                }
                self.resumes += 1;
                self.completed_at = None;
            }
            EventType::StageStarted => {
                if let Some(stage) = event.stage {
                    self.state = RunState::at(stage);
                    let outcome = self.outcomes.entry(stage).or_default();
                    outcome.status = StageStatus::Running;
                    outcome.attempts = event.attempt.unwrap_or(outcome.attempts + 1);
                }
            }
            EventType::StageRetrying => {
                if let Some(stage) = event.stage {
                    *self.retry_counts.entry(stage).or_default() += 1;
                    let outcome = self.outcomes.entry(stage).or_default();
                    outcome.error = event.error.clone();
                }
            }
            EventType::StageCompleted => {
                if let Some(stage) = event.stage {
                    let outcome = self.outcomes.entry(stage).or_default();
                    outcome.status = event.status;
                    outcome.error = None;
                    outcome.reference = event.reference.clone();
                    outcome.completed_at = Some(event.timestamp);

                    self.state = match stage.next() {
                        Some(next) => RunState::at(next),
                        None => RunState::Published {
                            reference: event.reference.clone().unwrap_or_default(),
                        },
                    };
                }
            }
            EventType::StageFailed => {
                if let Some(stage) = event.stage {
                    let outcome = self.outcomes.entry(stage).or_default();
                    outcome.status = StageStatus::Failed;
                    outcome.error = event.error.clone();
                }
            }
            EventType::RunPublished => {
                self.state = RunState::Published {
                    reference: event.reference.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                if let Some(stage) = event.stage {
                    self.state = RunState::Failed {
                        stage,
                        reason: event.error.clone().unwrap_or_default(),
                    };
                }
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunCancelled => {
                if let Some(stage) = event.stage {
                    self.state = RunState::Cancelled { stage };
                }
            }
        }
    }

    /// Stage the run would execute next, if it can make progress
    pub fn next_stage(&self) -> Option<Stage> {
        self.state.active_stage()
    }

    /// Check if the run reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_published(&self) -> bool {
        matches!(self.state, RunState::Published { .. })
    }

    /// Check if a specific stage is completed
    pub fn is_stage_completed(&self, stage: Stage) -> bool {
        self.outcomes
            .get(&stage)
            .map(|o| matches!(o.status, StageStatus::Completed | StageStatus::Skipped))
            .unwrap_or(false)
    }

    /// Retries made for a stage across all executions of this run
    pub fn retry_count(&self, stage: Stage) -> u32 {
        self.retry_counts.get(&stage).copied().unwrap_or(0)
    }

    /// Last stage whose output was attached
    pub fn last_completed_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .rev()
            .find(|stage| self.is_stage_completed(*stage))
    }

    /// Most recent error recorded on any stage
    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            RunState::Failed { reason, .. } => Some(reason.as_str()),
            _ => self
                .outcomes
                .values()
                .filter_map(|o| o.error.as_deref())
                .last(),
        }
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Entered the pipeline, nothing executed yet
    Pending,

    Extracting,
    Summarizing,
    Scripting,
    Synthesizing,
    Archiving,

    /// The archiver confirmed persistence
    Published { reference: String },

    /// A stage failed permanently
    Failed { stage: Stage, reason: String },

    /// Stopped at a stage boundary (can be resumed)
    Cancelled { stage: Stage },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunState {
    /// The in-progress state for a stage
    pub fn at(stage: Stage) -> Self {
        match stage {
            Stage::Extracting => Self::Extracting,
            Stage::Summarizing => Self::Summarizing,
            Stage::Scripting => Self::Scripting,
            Stage::Synthesizing => Self::Synthesizing,
            Stage::Archiving => Self::Archiving,
        }
    }

    /// Stage to execute from this state (None when terminal or stopped)
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            Self::Pending | Self::Extracting => Some(Stage::Extracting),
            Self::Summarizing => Some(Stage::Summarizing),
            Self::Scripting => Some(Stage::Scripting),
            Self::Synthesizing => Some(Stage::Synthesizing),
            Self::Archiving => Some(Stage::Archiving),
            Self::Published { .. } | Self::Failed { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Published or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published { .. } | Self::Failed { .. })
    }

    /// Stage a resume re-enters at
    pub fn resume_stage(&self) -> Option<Stage> {
        match self {
            Self::Failed { stage, .. } | Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Summarizing => "summarizing",
            Self::Scripting => "scripting",
            Self::Synthesizing => "synthesizing",
            Self::Archiving => "archiving",
            Self::Published { .. } => "published",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
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

    fn stage_event(stage: Stage, event_type: EventType, status: StageStatus) -> Event {
        Event::new(
            item_id(),
            Some(stage),
            event_type,
            format!("{}:{}:abc", item_id(), stage),
            format!("{} {:?}", stage, event_type),
            status,
        )
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Extracting.previous(), None);
        assert_eq!(Stage::Summarizing.previous(), Some(Stage::Extracting));
        assert_eq!(Stage::Synthesizing.next(), Some(Stage::Archiving));
        assert_eq!(Stage::Archiving.next(), None);
        assert_eq!("scripting".parse::<Stage>().unwrap(), Stage::Scripting);
    }

    #[test]
    fn test_run_creation() {
        let run = PipelineRun::new(item_id(), RunOptions::default());

        assert_eq!(run.state, RunState::Pending);
        assert_eq!(run.next_stage(), Some(Stage::Extracting));
        assert!(!run.is_finished());
    }

    #[test]
    fn test_run_from_events() {
        let mut events = vec![Event::new(
            item_id(),
            None,
            EventType::RunStarted,
            format!("{}:start", item_id()),
            "Run started".to_string(),
            StageStatus::Running,
        )
        .with_options(RunOptions {
            style: NarrativeStyle::Humorous,
            ..Default::default()
        })];

        for stage in Stage::ALL {
            events.push(stage_event(stage, EventType::StageStarted, StageStatus::Running));
            events.push(
                stage_event(stage, EventType::StageCompleted, StageStatus::Completed)
                    .with_reference(format!("ref:{}", stage)),
            );
        }

        let run = PipelineRun::from_events(&events).unwrap();

        assert_eq!(run.options.style, NarrativeStyle::Humorous);
        assert_eq!(
            run.state,
            RunState::Published {
                reference: "ref:archiving".to_string()
            }
        );
        assert!(run.is_stage_completed(Stage::Synthesizing));
        assert_eq!(run.last_completed_stage(), Some(Stage::Archiving));
    }

    #[test]
    fn test_failed_run_resumes_at_failed_stage() {
        let events = vec![
            stage_event(Stage::Extracting, EventType::StageStarted, StageStatus::Running),
            stage_event(Stage::Extracting, EventType::StageCompleted, StageStatus::Completed),
            stage_event(Stage::Summarizing, EventType::StageStarted, StageStatus::Running),
            stage_event(Stage::Summarizing, EventType::StageRetrying, StageStatus::Running)
                .with_error("timeout".to_string()),
            stage_event(Stage::Summarizing, EventType::StageFailed, StageStatus::Failed)
                .with_error("model unavailable".to_string()),
            stage_event(Stage::Summarizing, EventType::RunFailed, StageStatus::Failed)
                .with_error("model unavailable".to_string()),
        ];

        let mut run = PipelineRun::from_events(&events).unwrap();

        assert!(run.is_finished());
        assert_eq!(run.state.resume_stage(), Some(Stage::Summarizing));
        assert_eq!(run.retry_count(Stage::Summarizing), 1);
        assert_eq!(run.last_error(), Some("model unavailable"));
        assert_eq!(run.next_stage(), None);

        run.apply_event(&stage_event(
            Stage::Summarizing,
            EventType::RunResumed,
            StageStatus::Running,
        ));

        assert_eq!(run.state, RunState::Summarizing);
        assert_eq!(run.resumes, 1);
        assert!(run.is_stage_completed(Stage::Extracting));
    }

    #[test]
    fn test_cancelled_is_not_terminal() {
        let state = RunState::Cancelled {
            stage: Stage::Scripting,
        };
        assert!(!state.is_terminal());
        assert_eq!(state.active_stage(), None);
        assert_eq!(state.resume_stage(), Some(Stage::Scripting));
    }
}
