//! Synthesizer: script + backend selector + voice -> audio.
//!
//! Backends live in a registry keyed by name and can be added at runtime.
//! Retries are not handled here; the orchestrator retries the synthesizing
//! stage according to its retry policy.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::errors::SynthesisError;
use crate::adapters::{SilenceBackend, SpeechRequest, TtsBackend};
use crate::domain::{AudioAsset, Script, TtsBackendId, VoiceConfig};

/// Name -> TTS backend lookup
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Arc<RwLock<BTreeMap<String, Arc<dyn TtsBackend>>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a backend under its own id
    pub fn register(&self, backend: Arc<dyn TtsBackend>) {
        let name = backend.id().name().to_lowercase();
        self.backends
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, backend);
    }

    pub fn get(&self, id: &TtsBackendId) -> Option<Arc<dyn TtsBackend>> {
        self.backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id.name().to_lowercase())
            .cloned()
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> Vec<String> {
        self.backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct Synthesizer {
    backends: BackendRegistry,
}

impl Synthesizer {
    pub fn new(backends: BackendRegistry) -> Self {
        Self { backends }
    }

    /// Synthesizer with only the offline silence backend
    pub fn offline() -> Self {
        let backends = BackendRegistry::new();
        backends.register(Arc::new(SilenceBackend::new()));
        Self::new(backends)
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Speak `script` with `backend`.
    ///
    /// The returned audio is checked against the backend's duration bounds;
    /// out-of-bound audio is a transient error so the stage gets retried.
    pub async fn synthesize(
        &self,
        script: &Script,
        backend_id: &TtsBackendId,
        voice: &VoiceConfig,
    ) -> Result<AudioAsset, SynthesisError> {
        let backend = self
            .backends
            .get(backend_id)
            .ok_or_else(|| SynthesisError::UnregisteredBackend(backend_id.name().to_string()))?;

        if !backend.supports(&script.language, voice) {
            return Err(SynthesisError::UnsupportedVoice {
                backend: backend_id.name().to_string(),
                language: script.language.clone(),
                voice: voice.voice.clone(),
            });
        }

        let request = SpeechRequest {
            text: &script.text,
            language: &script.language,
            voice,
            words_per_minute: voice.speaking_rate.unwrap_or(script.words_per_minute),
        };
        let output = backend.synthesize(&request).await?;

        if output.data.is_empty() {
            return Err(SynthesisError::InvalidAudio("empty audio payload".to_string()));
        }
        backend
            .duration_bounds()
            .check(script.text.chars().count(), output.duration_secs)?;

        debug!(
            backend = %backend_id,
            duration_secs = output.duration_secs,
            bytes = output.data.len(),
            "Audio synthesized"
        );

        Ok(AudioAsset {
            data: output.data,
            format: output.format,
            duration_secs: output.duration_secs,
            sample_rate: output.sample_rate,
            script_hash: script.content_hash(),
            backend: backend_id.clone(),
            voice: voice.voice.clone(),
        })
    }
}
