//! Shared fixtures for integration tests: stage mocks that count their calls
//! and can be told to fail.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use newspeaker::adapters::{
    Archiver, EpisodeMetadata, Extractor, HtmlExtractor, SilenceBackend, SpeechOutput,
    SpeechRequest, Summarizer, TtsBackend,
};
use newspeaker::core::{
    ArchivalError, BackendRegistry, ExtractionError, PipelineOrchestrator, PipelineSettings,
    PipelineStages, RetryPolicy, RunStore, Scriptwriter, SummarizationError, SynthesisError,
    Synthesizer,
};
use newspeaker::domain::{
    AudioAsset, ContentItem, ExtractedText, Publication, Summary, TtsBackendId, VoiceConfig,
};

/// Article used by the happy path
pub fn article(url: &str, payload: &str) -> ContentItem {
    let published = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
    ContentItem::new(url, payload, published)
}

pub fn breaking_news() -> ContentItem {
    article("https://example.com/markets", "Breaking news: markets rise.")
}

/// Real HTML extractor behind a call counter
#[derive(Default)]
pub struct CountingExtractor {
    inner: HtmlExtractor,
    pub calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            inner: HtmlExtractor::from_settings(settings),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for CountingExtractor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn extract(
        &self,
        raw_payload: &str,
        source_url: &str,
        declared_language: Option<&str>,
    ) -> Result<ExtractedText, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .extract(raw_payload, source_url, declared_language)
            .await
    }
}

/// Summarizer answering from a queue of scripted responses.
///
/// Once the queue is empty every call returns `fallback`.
pub struct MockSummarizer {
    responses: Mutex<VecDeque<Result<String, SummarizationError>>>,
    fallback: Mutex<Result<String, SummarizationError>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl MockSummarizer {
    pub fn returning(text: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(text.to_string())),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: SummarizationError) -> Self {
        let mock = Self::returning("");
        *mock.fallback.lock().unwrap() = Err(error);
        mock
    }

    /// Answer the first calls from `responses`
    pub fn with_responses(self, responses: Vec<Result<String, SummarizationError>>) -> Self {
        *self.responses.lock().unwrap() = responses.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change what later calls return ("fix" the summarizer)
    pub fn set_fallback(&self, response: Result<String, SummarizationError>) {
        *self.fallback.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn summarize(
        &self,
        text: &ExtractedText,
        max_chars: usize,
    ) -> Result<Summary, SummarizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());

        response.map(|summary| Summary::new(summary, max_chars, text, "mock"))
    }
}

/// Silence backend behind a call counter, with scripted failures
pub struct CountingBackend {
    inner: SilenceBackend,
    failures: Mutex<VecDeque<SynthesisError>>,
    pub calls: AtomicUsize,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            inner: SilenceBackend::new(),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next calls with these errors
    pub fn fail_with(&self, errors: Vec<SynthesisError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsBackend for CountingBackend {
    fn id(&self) -> TtsBackendId {
        TtsBackendId::Silence
    }

    fn supports(&self, language: &str, _voice: &VoiceConfig) -> bool {
        language == "en" || language == "es"
    }

    async fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechOutput, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.inner.synthesize(request).await
    }
}

/// Archiver that records what it was given instead of writing a library
pub struct MockArchiver {
    failures: Mutex<VecDeque<ArchivalError>>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub archived: Mutex<Vec<EpisodeMetadata>>,
}

impl MockArchiver {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            archived: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_with(&self, errors: Vec<ArchivalError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Archiver for MockArchiver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn archive(
        &self,
        audio: &AudioAsset,
        metadata: &EpisodeMetadata,
    ) -> Result<Publication, ArchivalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        assert!(!audio.data.is_empty());

        self.archived.lock().unwrap().push(metadata.clone());
        Ok(Publication {
            reference: format!("mock://episodes/{}", metadata.item_id),
            published_at: Utc::now(),
        })
    }
}

/// An orchestrator wired to counting mocks over a temporary store
pub struct Harness {
    pub temp: TempDir,
    pub settings: PipelineSettings,
    pub extractor: Arc<CountingExtractor>,
    pub summarizer: Arc<MockSummarizer>,
    pub backend: Arc<CountingBackend>,
    pub archiver: Arc<MockArchiver>,
}

impl Harness {
    /// Immediate retries, three attempts per stage
    pub fn new(summarizer: MockSummarizer) -> Self {
        Self::with_settings(
            summarizer,
            PipelineSettings::default().with_retry_policy(RetryPolicy::immediate(3)),
        )
    }

    pub fn with_settings(summarizer: MockSummarizer, settings: PipelineSettings) -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            extractor: Arc::new(CountingExtractor::new(&settings)),
            summarizer: Arc::new(summarizer),
            backend: Arc::new(CountingBackend::new()),
            archiver: Arc::new(MockArchiver::new()),
            settings,
        }
    }

    pub fn with_archiver(mut self, archiver: MockArchiver) -> Self {
        self.archiver = Arc::new(archiver);
        self
    }

    pub fn store(&self) -> RunStore {
        RunStore::new(self.temp.path().join("runs"))
    }

    /// A fresh orchestrator over the same store and mocks
    pub fn orchestrator(&self) -> PipelineOrchestrator {
        let backends = BackendRegistry::new();
        backends.register(self.backend.clone());

        let stages = PipelineStages {
            extractor: self.extractor.clone(),
            summarizer: self.summarizer.clone(),
            scriptwriter: Scriptwriter::with_builtin_styles(),
            synthesizer: Synthesizer::new(backends),
            archiver: self.archiver.clone(),
        };
        PipelineOrchestrator::new(self.store(), self.settings.clone(), stages)
    }
}
