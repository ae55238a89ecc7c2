//! espeak-ng backend.
//!
//! Runs `espeak-ng --stdout`, feeding the script on stdin and reading WAV
//! from stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{wav, DurationBounds, SpeechOutput, SpeechRequest, TtsBackend};
use crate::core::errors::SynthesisError;
use crate::domain::{TtsBackendId, VoiceConfig};

pub const DEFAULT_ESPEAK_BINARY: &str = "espeak-ng";

/// espeak-ng backend using subprocess mode
#[derive(Debug, Clone)]
pub struct EspeakBackend {
    /// Path to the espeak-ng binary
    binary_path: String,

    /// Languages the installed voices cover
    languages: Vec<String>,
}

impl Default for EspeakBackend {
    fn default() -> Self {
        Self::new(DEFAULT_ESPEAK_BINARY)
    }
}

impl EspeakBackend {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            languages: vec!["en".to_string(), "es".to_string()],
        }
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    /// Voice argument: an explicit voice wins, otherwise the language
    fn voice_arg(language: &str, voice: &VoiceConfig) -> String {
        if voice.voice.is_empty() || voice.voice == "default" {
            language.to_string()
        } else {
            voice.voice.clone()
        }
    }
}

#[async_trait]
impl TtsBackend for EspeakBackend {
    fn id(&self) -> TtsBackendId {
        TtsBackendId::Espeak
    }

    fn supports(&self, language: &str, voice: &VoiceConfig) -> bool {
        let language_ok = self.languages.iter().any(|l| l.eq_ignore_ascii_case(language));
        // espeak voice names are "<lang>" or "<lang>-<variant>"
        let voice_ok = voice.voice == "default"
            || voice
                .voice
                .split(['-', '+'])
                .next()
                .map(|prefix| prefix.eq_ignore_ascii_case(language))
                .unwrap_or(false);
        language_ok && voice_ok
    }

    fn duration_bounds(&self) -> DurationBounds {
        // espeak pads less than neural engines but reads digits slowly
        DurationBounds {
            min_secs_per_char: 0.02,
            max_secs_per_char: 0.3,
            slack_secs: 1.0,
        }
    }

    async fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SynthesisError> {
        let voice = Self::voice_arg(request.language, request.voice);
        let wpm = request
            .voice
            .speaking_rate
            .unwrap_or(request.words_per_minute)
            .clamp(80, 450);

        let mut child = Command::new(&self.binary_path)
            .args(["--stdout", "-v", &voice, "-s", &wpm.to_string()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SynthesisError::Rejected(format!(
                    "{} not found; install espeak-ng or pick another backend",
                    self.binary_path
                )),
                _ => SynthesisError::Unavailable(format!("Failed to spawn {}: {}", self.binary_path, e)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.text.as_bytes())
                .await
                .map_err(|e| SynthesisError::Unavailable(format!("Failed to write to espeak stdin: {}", e)))?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SynthesisError::Unavailable(format!("Failed to wait for espeak: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(SynthesisError::Rejected(format!(
                "espeak-ng failed with exit code {}: {}",
                exit_code,
                stderr.trim()
            )));
        }

        let info = wav::parse(&output.stdout)?;
        debug!(voice = %voice, wpm, secs = info.duration_secs(), "espeak-ng produced audio");

        Ok(SpeechOutput {
            duration_secs: info.duration_secs(),
            sample_rate: info.sample_rate,
            format: "wav".to_string(),
            data: output.stdout,
        })
    }
}
