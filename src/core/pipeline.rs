//! Pipeline settings.
//!
//! The stage sequence itself is fixed (extract, summarize, script,
//! synthesize, archive); what is configurable is how each stage is retried
//! and timed out, and the bounds the stages must honor. Settings come from
//! the `pipeline:` section of the config file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{NarrativeStyle, RunOptions, Stage, TtsBackendId, VoiceConfig};

/// Settings for the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Normalized text shorter than this is not an article (default: 20)
    #[serde(default = "default_min_extract_chars")]
    pub min_extract_chars: usize,

    /// Language tags the extractor accepts
    #[serde(default = "default_supported_languages")]
    pub supported_languages: Vec<String>,

    /// Language assumed when the source declares none
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Upper bound on summary length in characters (default: 600)
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,

    /// Maximum raw payload size in bytes (default: 10MB)
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Per-stage timeout in seconds (default: 300 = 5 min)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Items processed at the same time (default: 4)
    #[serde(default = "default_max_concurrent_items")]
    pub max_concurrent_items: usize,

    #[serde(default)]
    pub default_style: NarrativeStyle,

    #[serde(default)]
    pub default_backend: TtsBackendId,

    #[serde(default)]
    pub voice: VoiceConfig,

    /// Per-stage overrides
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageSettings>,
}

fn default_min_extract_chars() -> usize {
    20
}
fn default_supported_languages() -> Vec<String> {
    vec!["en".to_string(), "es".to_string()]
}
fn default_language() -> String {
    "en".to_string()
}
fn default_max_summary_chars() -> usize {
    600
}
fn default_max_payload_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_step_timeout() -> u64 {
    300
} // 5 min
fn default_max_concurrent_items() -> usize {
    4
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_extract_chars: default_min_extract_chars(),
            supported_languages: default_supported_languages(),
            default_language: default_language(),
            max_summary_chars: default_max_summary_chars(),
            max_payload_bytes: default_max_payload_bytes(),
            step_timeout_seconds: default_step_timeout(),
            max_concurrent_items: default_max_concurrent_items(),
            default_style: NarrativeStyle::default(),
            default_backend: TtsBackendId::default(),
            voice: VoiceConfig::default(),
            stages: BTreeMap::new(),
        }
    }
}

impl PipelineSettings {
    /// Load settings from a standalone YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline settings: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse settings from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline settings YAML")
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.min_extract_chars == 0 {
            anyhow::bail!("min_extract_chars must be at least 1");
        }
        if self.max_summary_chars < self.min_extract_chars {
            anyhow::bail!(
                "max_summary_chars ({}) is smaller than min_extract_chars ({})",
                self.max_summary_chars,
                self.min_extract_chars
            );
        }
        if self.max_concurrent_items == 0 {
            anyhow::bail!("max_concurrent_items must be at least 1");
        }
        if !self.supported_languages.contains(&self.default_language) {
            anyhow::bail!(
                "default_language '{}' is not in supported_languages",
                self.default_language
            );
        }

        for (stage, settings) in &self.stages {
            let policy = &settings.retry_policy;
            if policy.max_attempts == 0 {
                anyhow::bail!("Stage '{}' has max_attempts = 0", stage);
            }
            if policy.backoff_multiplier < 1.0 {
                anyhow::bail!("Stage '{}' has a backoff_multiplier below 1.0", stage);
            }
        }

        Ok(())
    }

    /// Effective settings for a stage
    pub fn stage(&self, stage: Stage) -> StageSettings {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    pub fn retry_policy(&self, stage: Stage) -> RetryPolicy {
        self.stage(stage).retry_policy
    }

    /// Get the effective timeout for a stage
    pub fn timeout(&self, stage: Stage) -> Duration {
        let seconds = self
            .stages
            .get(&stage)
            .and_then(|s| s.timeout_seconds)
            .unwrap_or(self.step_timeout_seconds);
        Duration::from_secs(seconds)
    }

    /// Apply the same retry policy to every stage
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        for stage in Stage::ALL {
            self.stages.entry(stage).or_default().retry_policy = policy.clone();
        }
        self
    }

    /// Run options used when the caller does not choose
    pub fn default_options(&self) -> RunOptions {
        RunOptions {
            style: self.default_style.clone(),
            backend: self.default_backend.clone(),
            voice: self.voice.clone(),
        }
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.supported_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
    }
}

/// Per-stage overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSettings {
    /// Retry policy for this stage
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Override timeout for this stage (uses step_timeout_seconds if not set)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Retry policy for failed stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SETTINGS_YAML: &str = r#"
min_extract_chars: 40
max_summary_chars: 300
default_style: conversational
default_backend: espeak
voice:
  voice: es-la
stages:
  summarizing:
    retry_policy:
      max_attempts: 5
      initial_delay_ms: 200
    timeout_seconds: 60
"#;

    #[test]
    fn test_settings_parsing() {
        let settings = PipelineSettings::from_yaml(TEST_SETTINGS_YAML).unwrap();

        assert_eq!(settings.min_extract_chars, 40);
        assert_eq!(settings.max_summary_chars, 300);
        assert_eq!(settings.default_style, NarrativeStyle::Conversational);
        assert_eq!(settings.default_backend, TtsBackendId::Espeak);
        assert_eq!(settings.voice.voice, "es-la");
        assert_eq!(settings.supported_languages, vec!["en", "es"]);

        let policy = settings.retry_policy(Stage::Summarizing);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay_ms, 200);
        assert_eq!(policy.max_delay_ms, 30000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_stage_timeout_override() {
        let settings = PipelineSettings::from_yaml(TEST_SETTINGS_YAML).unwrap();

        assert_eq!(settings.timeout(Stage::Summarizing), Duration::from_secs(60));
        assert_eq!(settings.timeout(Stage::Synthesizing), Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_settings() {
        let settings = PipelineSettings {
            max_concurrent_items: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = PipelineSettings {
            default_language: "fr".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_with_retry_policy_applies_to_every_stage() {
        let settings = PipelineSettings::default().with_retry_policy(RetryPolicy::immediate(2));

        for stage in Stage::ALL {
            assert_eq!(settings.retry_policy(stage).max_attempts, 2);
            assert_eq!(settings.retry_policy(stage).delay_for_attempt(3), Duration::ZERO);
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
