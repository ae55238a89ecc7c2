//! Names of narrative styles and TTS backends.
//!
//! Both are open sets: the built-in variants cover what ships with the
//! crate, `Custom` covers anything registered at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tone/format policy applied when writing a script
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NarrativeStyle {
    Educational,
    Conversational,
    Humorous,
    Custom(String),
}

impl NarrativeStyle {
    pub fn name(&self) -> &str {
        match self {
            Self::Educational => "educational",
            Self::Conversational => "conversational",
            Self::Humorous => "humorous",
            Self::Custom(name) => name,
        }
    }
}

impl Default for NarrativeStyle {
    fn default() -> Self {
        Self::Educational
    }
}

impl fmt::Display for NarrativeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NarrativeStyle {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "educational" | "educativo" => Self::Educational,
            "conversational" | "conversacional" => Self::Conversational,
            "humorous" | "humoristico" => Self::Humorous,
            _ => Self::Custom(normalized),
        })
    }
}

impl Serialize for NarrativeStyle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for NarrativeStyle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

/// Text-to-speech engine selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TtsBackendId {
    /// Offline generator producing silent WAV of the right length
    Silence,

    /// Local espeak-ng binary
    Espeak,

    /// OpenAI-compatible `/audio/speech` endpoint
    HttpSpeech,

    Custom(String),
}

impl TtsBackendId {
    pub fn name(&self) -> &str {
        match self {
            Self::Silence => "silence",
            Self::Espeak => "espeak",
            Self::HttpSpeech => "http_speech",
            Self::Custom(name) => name,
        }
    }
}

impl Default for TtsBackendId {
    fn default() -> Self {
        Self::Silence
    }
}

impl fmt::Display for TtsBackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TtsBackendId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "silence" => Self::Silence,
            "espeak" | "espeak-ng" => Self::Espeak,
            "http_speech" | "openai_compat" | "openai" => Self::HttpSpeech,
            _ => Self::Custom(normalized),
        })
    }
}

impl Serialize for TtsBackendId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for TtsBackendId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

/// Voice selection passed to a TTS backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Backend-specific voice name
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Words per minute; overrides the pacing of the narrative style
    #[serde(default)]
    pub speaking_rate: Option<u32>,
}

fn default_voice() -> String {
    "default".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            speaking_rate: None,
        }
    }
}

impl VoiceConfig {
    pub fn named(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            speaking_rate: None,
        }
    }
}
