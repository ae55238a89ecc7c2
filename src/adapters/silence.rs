//! Offline TTS stand-in.
//!
//! Produces silent 16-bit mono WAV whose length is what a narrator would
//! need for the script at the requested pace. Useful for dry runs and for
//! exercising the whole pipeline without a speech engine.

use async_trait::async_trait;

use super::{wav, SpeechOutput, SpeechRequest, TtsBackend};
use crate::core::errors::SynthesisError;
use crate::domain::{TtsBackendId, VoiceConfig};

const SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Default)]
pub struct SilenceBackend;

impl SilenceBackend {
    pub fn new() -> Self {
        Self
    }

    /// Seconds needed to speak `text` at `words_per_minute`
    pub fn spoken_secs(text: &str, words_per_minute: u32) -> f64 {
        let words = text.split_whitespace().count().max(1) as f64;
        let wpm = words_per_minute.clamp(80, 300) as f64;
        words * 60.0 / wpm
    }
}

#[async_trait]
impl TtsBackend for SilenceBackend {
    fn id(&self) -> TtsBackendId {
        TtsBackendId::Silence
    }

    fn supports(&self, _language: &str, _voice: &VoiceConfig) -> bool {
        true
    }

    async fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SynthesisError> {
        if request.text.trim().is_empty() {
            return Err(SynthesisError::Rejected("empty script".to_string()));
        }

        let secs = Self::spoken_secs(request.text, request.words_per_minute);
        let sample_count = (secs * SAMPLE_RATE as f64).round() as usize;
        let data = wav::encode_pcm16_mono(&vec![0i16; sample_count], SAMPLE_RATE);

        Ok(SpeechOutput {
            data,
            format: "wav".to_string(),
            sample_rate: SAMPLE_RATE,
            duration_secs: sample_count as f64 / SAMPLE_RATE as f64,
        })
    }
}
