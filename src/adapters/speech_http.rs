//! OpenAI-compatible speech endpoint (`POST {base}/audio/speech`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{wav, SpeechOutput, SpeechRequest, TtsBackend};
use crate::core::errors::SynthesisError;
use crate::domain::{TtsBackendId, VoiceConfig};

/// Pace the endpoint's `speed: 1.0` corresponds to
const BASE_WORDS_PER_MINUTE: f32 = 150.0;

pub struct HttpSpeechBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,

    /// Voices the server offers; empty means "don't check"
    voices: Vec<String>,

    /// Voice used when the run asks for "default"
    default_voice: String,

    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

impl HttpSpeechBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            voices: Vec::new(),
            default_voice: "alloy".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_voices(mut self, voices: Vec<String>) -> Self {
        self.voices = voices;
        self
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }

    fn resolve_voice<'a>(&'a self, voice: &'a VoiceConfig) -> &'a str {
        if voice.voice == "default" {
            &self.default_voice
        } else {
            &voice.voice
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> SynthesisError {
        let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
        if status.as_u16() == 429 {
            SynthesisError::RateLimited
        } else if status.is_server_error() {
            SynthesisError::Unavailable(detail)
        } else {
            SynthesisError::Rejected(detail)
        }
    }
}

#[async_trait]
impl TtsBackend for HttpSpeechBackend {
    fn id(&self) -> TtsBackendId {
        TtsBackendId::HttpSpeech
    }

    fn supports(&self, _language: &str, voice: &VoiceConfig) -> bool {
        let voice = self.resolve_voice(voice);
        self.voices.is_empty() || self.voices.iter().any(|v| v == voice)
    }

    async fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SynthesisError> {
        let url = format!("{}/audio/speech", self.base_url);
        let wpm = request
            .voice
            .speaking_rate
            .unwrap_or(request.words_per_minute);
        let body = SpeechBody {
            model: &self.model,
            input: request.text,
            voice: self.resolve_voice(request.voice),
            response_format: "wav",
            speed: (wpm as f32 / BASE_WORDS_PER_MINUTE).clamp(0.25, 4.0),
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SynthesisError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Unavailable(format!("Failed to read audio body: {}", e)))?
            .to_vec();
        let info = wav::parse(&data)?;

        debug!(model = %self.model, secs = info.duration_secs(), "Speech endpoint produced audio");
        Ok(SpeechOutput {
            duration_secs: info.duration_secs(),
            sample_rate: info.sample_rate,
            format: "wav".to_string(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            HttpSpeechBackend::classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            SynthesisError::RateLimited
        );
        assert!(HttpSpeechBackend::classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!HttpSpeechBackend::classify_status(StatusCode::BAD_REQUEST, "bad voice").is_transient());
    }

    #[test]
    fn test_supports_checks_voice_list() {
        let backend = HttpSpeechBackend::new("http://localhost:8000/v1", "tts-1")
            .with_voices(vec!["alloy".to_string(), "nova".to_string()]);

        assert!(backend.supports("en", &VoiceConfig::default()));
        assert!(backend.supports("es", &VoiceConfig::named("nova")));
        assert!(!backend.supports("en", &VoiceConfig::named("zeus")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let backend = HttpSpeechBackend::new("http://127.0.0.1:9", "tts-1")
            .with_timeout(Duration::from_secs(2));
        let voice = VoiceConfig::default();
        let err = backend
            .synthesize(&SpeechRequest {
                text: "Markets rose today.",
                language: "en",
                voice: &voice,
                words_per_minute: 150,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::Unavailable(_)));
    }
}
