//! Main orchestrator for pipeline execution.
//!
//! Drives each content item through extract, summarize, script, synthesize
//! and archive. Every transition is an event appended to the item's log; the
//! item snapshot is persisted before the completion event, so a crash never
//! leaves the log ahead of the stored outputs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{Archiver, EpisodeMetadata, Extractor, SourceAdapter, Summarizer};
use crate::domain::{
    hash_text, AttachError, ContentId, ContentItem, Event, EventType, PipelineRun, RunOptions,
    RunState, Script, Stage, StageOutput, StageStatus, Summary,
};
use crate::text::novel_entities;

use super::cache::ArtifactCache;
use super::errors::{ItemBusy, PipelineError, StageFailure, SummarizationError};
use super::locks::{ItemLocks, ItemToken};
use super::pipeline::PipelineSettings;
use super::run_store::{generate_idempotency_key, Checkpoint, RunStore};
use super::scriptwriter::Scriptwriter;
use super::synthesizer::Synthesizer;

/// The stage implementations a pipeline runs with
#[derive(Clone)]
pub struct PipelineStages {
    pub extractor: Arc<dyn Extractor>,
    pub summarizer: Arc<dyn Summarizer>,
    pub scriptwriter: Scriptwriter,
    pub synthesizer: Synthesizer,
    pub archiver: Arc<dyn Archiver>,
}

/// Outcome counts of a `run_source` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub published: usize,
    pub failed: usize,
    pub cancelled: usize,

    /// Items another worker already owned
    pub busy: usize,

    /// Repeated identifiers within the stream
    pub duplicates: usize,

    /// Records the source could not turn into items
    pub invalid: usize,

    /// Store or task errors
    pub errors: usize,
}

/// Main pipeline orchestrator
pub struct PipelineOrchestrator {
    store: RunStore,
    cache: Option<ArtifactCache>,
    locks: ItemLocks,
    settings: PipelineSettings,
    stages: PipelineStages,
    cancel_requests: Arc<Mutex<HashSet<ContentId>>>,
}

impl PipelineOrchestrator {
    pub fn new(store: RunStore, settings: PipelineSettings, stages: PipelineStages) -> Self {
        Self {
            store,
            cache: None,
            locks: ItemLocks::new(),
            settings,
            stages,
            cancel_requests: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reuse summaries, scripts and audio across items
    pub fn with_cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share the token registry with another orchestrator
    pub fn with_locks(mut self, locks: ItemLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn locks(&self) -> &ItemLocks {
        &self.locks
    }

    pub fn stages(&self) -> &PipelineStages {
        &self.stages
    }

    /// Run an item through the pipeline.
    ///
    /// A published item is returned as stored. A failed or cancelled item is
    /// returned unchanged; use `resume` to retry it. An item whose previous
    /// worker died mid-run continues where it stopped.
    #[instrument(skip(self, item, options), fields(item_id = %item.id()))]
    pub async fn process(&self, item: ContentItem, options: RunOptions) -> Result<PipelineRun> {
        let id = item.id().clone();

        if let Some(run) = self.store.load_run(&id).await? {
            if run.is_published() {
                info!("Item already published, nothing to do");
                return Ok(run);
            }
        }

        let _token = self.acquire(&id).await?;

        // Re-read under the token: another worker may have finished meanwhile
        if let Some(run) = self.store.load_run(&id).await? {
            if run.is_finished() || matches!(run.state, RunState::Cancelled { .. }) {
                info!(state = run.state.label(), "Item already has a stopped run");
                return Ok(run);
            }
            return self.continue_run(run).await;
        }

        info!(url = %item.source_url(), style = %options.style, backend = %options.backend, "Starting run");

        self.store.save_item(&item).await?;
        let mut run = PipelineRun::new(id.clone(), options.clone());
        let started = Event::new(
            id.clone(),
            None,
            EventType::RunStarted,
            format!("{}:start", id),
            format!("Run started for {}", item.source_url()),
            StageStatus::Running,
        )
        .with_options(options);
        self.record(&mut run, started).await?;
        self.checkpoint(&run).await?;

        let mut item = item;
        self.drive(&mut item, &mut run, Stage::Extracting).await?;
        Ok(run)
    }

    /// Resume a failed, cancelled or interrupted run at the stage it stopped
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn resume(&self, id: &ContentId) -> Result<PipelineRun> {
        let run = self
            .store
            .load_run(id)
            .await?
            .with_context(|| format!("No run found for item {}", id))?;

        if run.is_published() {
            info!("Item already published, nothing to resume");
            return Ok(run);
        }

        let _token = self.acquire(id).await?;
        let run = self
            .store
            .load_run(id)
            .await?
            .with_context(|| format!("No run found for item {}", id))?;
        if run.is_published() {
            return Ok(run);
        }

        self.continue_run(run).await
    }

    /// Ask the worker owning `id` to stop at the next stage boundary.
    ///
    /// Returns false if no worker in this process holds the item.
    pub fn cancel(&self, id: &ContentId) -> bool {
        let mut requests = lock_requests(&self.cancel_requests);
        if !self.locks.is_held(id) {
            return false;
        }
        info!(item_id = %id, "Cancellation requested");
        requests.insert(id.clone());
        true
    }

    /// Current run of an item, rebuilt from its log
    pub async fn status(&self, id: &ContentId) -> Result<Option<PipelineRun>> {
        self.store.load_run(id).await
    }

    /// Runs in the store, most recently updated first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let mut runs = Vec::new();
        for id in self.store.list_runs().await? {
            match self.store.load_run(&id).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => warn!(item_id = %id, error = %format!("{:#}", e), "Skipping unreadable run"),
            }
        }

        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        runs.truncate(limit);
        Ok(runs)
    }

    /// Pull items from `source` and process them concurrently.
    ///
    /// At most `max_concurrent_items` items are in flight; identifiers seen
    /// earlier in the stream are skipped.
    pub async fn run_source(
        self: Arc<Self>,
        source: &dyn SourceAdapter,
        options: RunOptions,
    ) -> Result<SourceReport> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_items.max(1)));
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();
        let mut report = SourceReport::default();
        let mut items = source.items();

        info!(source = source.name(), "Reading source");

        while let Some(next) = items.next().await {
            let item = match next {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "Skipping unreadable source record");
                    report.invalid += 1;
                    continue;
                }
            };

            if !seen.insert(item.id().clone()) {
                debug!(item_id = %item.id(), "Duplicate item in source");
                report.duplicates += 1;
                continue;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("Worker pool closed")?;
            let orchestrator = Arc::clone(&self);
            let options = options.clone();
            tasks.spawn(async move {
                let _permit = permit;
                orchestrator.process(item, options).await
            });

            while let Some(joined) = tasks.try_join_next() {
                tally(&mut report, joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            tally(&mut report, joined);
        }

        info!(
            published = report.published,
            failed = report.failed,
            duplicates = report.duplicates,
            "Source drained"
        );
        Ok(report)
    }

    /// Take the in-process token and the cross-process file lock
    async fn acquire(&self, id: &ContentId) -> Result<ItemToken> {
        let mut token = self
            .locks
            .try_acquire(id)
            .ok_or_else(|| ItemBusy(id.clone()))?;

        self.store.ensure_dir(id).await?;
        let locked = token
            .lock_file(&self.store.lock_path(id))
            .with_context(|| format!("Failed to lock run directory of {}", id))?;
        if !locked {
            return Err(ItemBusy(id.clone()).into());
        }

        // A request that raced the previous worker's exit is stale
        lock_requests(&self.cancel_requests).remove(id);
        Ok(token)
    }

    async fn continue_run(&self, mut run: PipelineRun) -> Result<PipelineRun> {
        let id = run.item_id.clone();
        let Some(stage) = run.state.resume_stage().or_else(|| run.next_stage()) else {
            return Ok(run);
        };

        let mut item = self
            .store
            .load_item(&id)
            .await?
            .with_context(|| format!("No stored item for run {}", id))?;

        info!(stage = %stage, resumes = run.resumes + 1, "Resuming run");

        let resumed = Event::new(
            id.clone(),
            Some(stage),
            EventType::RunResumed,
            format!("{}:resume:{}", id, run.resumes + 1),
            format!("Run resumed at {}", stage),
            StageStatus::Running,
        );
        self.record(&mut run, resumed).await?;

        self.drive(&mut item, &mut run, stage).await?;
        Ok(run)
    }

    /// Execute stages from `from` until published, failed or cancelled
    async fn drive(&self, item: &mut ContentItem, run: &mut PipelineRun, from: Stage) -> Result<()> {
        let id = item.id().clone();
        let result = self.drive_stages(item, run, from).await;
        lock_requests(&self.cancel_requests).remove(&id);
        result
    }

    async fn drive_stages(
        &self,
        item: &mut ContentItem,
        run: &mut PipelineRun,
        from: Stage,
    ) -> Result<()> {
        let id = item.id().clone();

        for stage in Stage::ALL.into_iter().filter(|s| *s >= from) {
            if lock_requests(&self.cancel_requests).remove(&id) {
                let cancelled = Event::new(
                    id.clone(),
                    Some(stage),
                    EventType::RunCancelled,
                    format!("{}:cancel:{}", id, stage),
                    format!("Run cancelled before {}", stage),
                    StageStatus::Pending,
                );
                self.record(run, cancelled).await?;
                self.checkpoint(run).await?;
                info!(stage = %stage, "Run cancelled");
                return Ok(());
            }

            if item.has_output(stage) {
                if !run.is_stage_completed(stage) {
                    let skipped = Event::new(
                        id.clone(),
                        Some(stage),
                        EventType::StageCompleted,
                        self.idempotency_key(item, &run.options, stage),
                        format!("{} output already attached", stage),
                        StageStatus::Skipped,
                    )
                    .with_reference(attached_reference(item, stage).unwrap_or_default());
                    self.record(run, skipped).await?;
                    self.checkpoint(run).await?;
                }
                debug!(stage = %stage, "Stage output already attached, skipping");
                continue;
            }

            if !self.run_stage(item, run, stage).await? {
                return Ok(());
            }
        }

        let reference = item
            .publication()
            .map(|p| p.reference.clone())
            .unwrap_or_default();
        let published = Event::new(
            id.clone(),
            None,
            EventType::RunPublished,
            format!("{}:published", id),
            format!("Episode published at {}", reference),
            StageStatus::Completed,
        )
        .with_reference(reference.clone());
        self.record(run, published).await?;
        self.checkpoint(run).await?;

        info!(%reference, "Run published");
        Ok(())
    }

    /// Run one stage with retries; false if the run ended Failed
    async fn run_stage(&self, item: &mut ContentItem, run: &mut PipelineRun, stage: Stage) -> Result<bool> {
        let id = item.id().clone();
        let policy = self.settings.retry_policy(stage);
        let timeout = self.settings.timeout(stage);
        let idem_key = self.idempotency_key(item, &run.options, stage);

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let stage_start = Instant::now();

            let started = Event::new(
                id.clone(),
                Some(stage),
                EventType::StageStarted,
                idem_key.clone(),
                format!("{} attempt {}", stage, attempt),
                StageStatus::Running,
            )
            .with_attempt(attempt);
            self.record(run, started).await?;

            let result = match tokio::time::timeout(timeout, self.attempt_stage(item, &run.options, stage)).await {
                Ok(result) => result,
                Err(_) => Err(StageFailure::Timeout(timeout)),
            };
            let result = match result {
                Ok(output) => self.attach_and_persist(item, output).await,
                Err(failure) => Err(failure),
            };

            let duration_ms = stage_start.elapsed().as_millis() as u64;

            match result {
                Ok(reference) => {
                    let completed = Event::new(
                        id.clone(),
                        Some(stage),
                        EventType::StageCompleted,
                        idem_key,
                        format!("{} completed in {}ms", stage, duration_ms),
                        StageStatus::Completed,
                    )
                    .with_attempt(attempt)
                    .with_duration(duration_ms)
                    .with_reference(reference);
                    self.record(run, completed).await?;
                    self.checkpoint(run).await?;

                    debug!(stage = %stage, attempt, duration_ms, "Stage completed");
                    return Ok(true);
                }
                Err(failure) => {
                    if failure.is_transient() && policy.should_retry(attempt) {
                        let delay = policy.delay_for_attempt(attempt);

                        let retrying = Event::new(
                            id.clone(),
                            Some(stage),
                            EventType::StageRetrying,
                            format!("{}:retry:{}", idem_key, attempt),
                            format!("{} failed, retrying in {:?}", stage, delay),
                            StageStatus::Running,
                        )
                        .with_attempt(attempt)
                        .with_error(failure.to_string());
                        self.record(run, retrying).await?;

                        warn!(
                            stage = %stage,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure,
                            "Stage failed, retrying"
                        );

                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let reason = failure.to_string();
                    let stage_failed = Event::new(
                        id.clone(),
                        Some(stage),
                        EventType::StageFailed,
                        idem_key,
                        format!("{} failed after {} attempts", stage, attempt),
                        StageStatus::Failed,
                    )
                    .with_attempt(attempt)
                    .with_duration(duration_ms)
                    .with_error(reason.clone());
                    self.record(run, stage_failed).await?;

                    let run_failed = Event::new(
                        id.clone(),
                        Some(stage),
                        EventType::RunFailed,
                        format!("{}:failed:{}", id, stage),
                        format!("Run failed at {}", stage),
                        StageStatus::Failed,
                    )
                    .with_error(reason);
                    self.record(run, run_failed).await?;
                    self.checkpoint(run).await?;

                    let err = PipelineError::new(id.clone(), stage, failure);
                    error!(attempt, transient = err.is_transient(), error = %err, "Stage failed permanently");
                    return Ok(false);
                }
            }
        }
    }

    /// One attempt at a stage's work, without side effects on the item
    async fn attempt_stage(
        &self,
        item: &ContentItem,
        options: &RunOptions,
        stage: Stage,
    ) -> Result<StageOutput, StageFailure> {
        match stage {
            Stage::Extracting => {
                let extracted = self
                    .stages
                    .extractor
                    .extract(item.raw_payload(), item.source_url(), item.language())
                    .await?;
                Ok(StageOutput::Extracted(extracted))
            }
            Stage::Summarizing => {
                let extracted = upstream(item.extracted(), stage)?;
                let max_chars = self.settings.max_summary_chars;
                let summarizer = &self.stages.summarizer;
                let key = ArtifactCache::key(
                    stage,
                    &[&extracted.content_hash(), summarizer.name(), &max_chars.to_string()],
                );

                if let Some(summary) = self.cached::<Summary>(stage, &key).await {
                    if summary.char_count() <= max_chars {
                        return Ok(StageOutput::Summary(summary));
                    }
                }

                let summary = summarizer.summarize(extracted, max_chars).await?;
                if summary.char_count() > max_chars {
                    return Err(SummarizationError::LengthExceeded {
                        actual: summary.char_count(),
                        max: max_chars,
                    }
                    .into());
                }

                let novel = novel_entities(&summary.text, &extracted.text);
                if !novel.is_empty() {
                    warn!(summarizer = summarizer.name(), ?novel, "Summary names entities absent from the article");
                }

                self.remember(stage, &key, &summary).await;
                Ok(StageOutput::Summary(summary))
            }
            Stage::Scripting => {
                let summary = upstream(item.summary(), stage)?;
                let language = item
                    .extracted()
                    .map(|e| e.language.clone())
                    .unwrap_or_else(|| self.settings.default_language.clone());
                let rate = options.voice.speaking_rate.map(|r| r.to_string()).unwrap_or_default();
                let key = ArtifactCache::key(
                    stage,
                    &[&hash_text(&summary.text), options.style.name(), &language, &rate],
                );

                if let Some(script) = self.cached::<Script>(stage, &key).await {
                    return Ok(StageOutput::Script(script));
                }

                let script = self.stages.scriptwriter.write(
                    summary,
                    &options.style,
                    &language,
                    options.voice.speaking_rate,
                )?;
                self.remember(stage, &key, &script).await;
                Ok(StageOutput::Script(script))
            }
            Stage::Synthesizing => {
                let script = upstream(item.script(), stage)?;
                let rate = options.voice.speaking_rate.map(|r| r.to_string()).unwrap_or_default();
                let key = ArtifactCache::key(
                    stage,
                    &[&script.content_hash(), options.backend.name(), &options.voice.voice, &rate],
                );

                if let Some(cache) = &self.cache {
                    if let Some(audio) = cache.get_audio(&key).await {
                        return Ok(StageOutput::Audio(audio));
                    }
                }

                let audio = self
                    .stages
                    .synthesizer
                    .synthesize(script, &options.backend, &options.voice)
                    .await?;

                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put_audio(&key, &audio).await {
                        warn!(error = %format!("{:#}", e), "Failed to cache audio");
                    }
                }
                Ok(StageOutput::Audio(audio))
            }
            Stage::Archiving => {
                let audio = upstream(item.audio(), stage)?;
                let metadata = EpisodeMetadata::from_item(item, audio);
                let publication = self.stages.archiver.archive(audio, &metadata).await?;
                Ok(StageOutput::Published(publication))
            }
        }
    }

    /// Attach the output and persist the snapshot; returns the output reference
    async fn attach_and_persist(
        &self,
        item: &mut ContentItem,
        output: StageOutput,
    ) -> Result<String, StageFailure> {
        let reference = output.reference();
        let mut next = item.clone();
        next.attach(output)?;

        self.store
            .save_item(&next)
            .await
            .map_err(|e| StageFailure::Storage(format!("{:#}", e)))?;

        *item = next;
        Ok(reference)
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, stage: Stage, key: &str) -> Option<T> {
        self.cache.as_ref()?.get(stage, key).await
    }

    async fn remember<T: Serialize>(&self, stage: Stage, key: &str, value: &T) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(stage, key, value).await {
                warn!(stage = %stage, error = %format!("{:#}", e), "Failed to cache stage output");
            }
        }
    }

    /// Key identifying a stage over the input it consumes
    fn idempotency_key(&self, item: &ContentItem, options: &RunOptions, stage: Stage) -> String {
        let input = match stage {
            Stage::Extracting => hash_text(item.raw_payload()),
            Stage::Summarizing => format!(
                "{}:{}",
                item.extracted().map(|e| e.content_hash()).unwrap_or_default(),
                self.settings.max_summary_chars
            ),
            Stage::Scripting => format!(
                "{}:{}",
                item.summary().map(|s| hash_text(&s.text)).unwrap_or_default(),
                options.style
            ),
            Stage::Synthesizing => format!(
                "{}:{}:{}",
                item.script().map(|s| s.content_hash()).unwrap_or_default(),
                options.backend,
                options.voice.voice
            ),
            Stage::Archiving => item
                .audio()
                .map(|a| a.script_hash.clone())
                .unwrap_or_default(),
        };
        generate_idempotency_key(item.id(), stage, &input)
    }

    /// Append an event and apply it to the in-memory run
    async fn record(&self, run: &mut PipelineRun, event: Event) -> Result<()> {
        self.store.append(&event).await?;
        run.apply_event(&event);
        Ok(())
    }

    async fn checkpoint(&self, run: &PipelineRun) -> Result<()> {
        self.store.write_checkpoint(&Checkpoint::from_run(run)).await
    }
}

fn lock_requests(requests: &Mutex<HashSet<ContentId>>) -> MutexGuard<'_, HashSet<ContentId>> {
    requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn upstream<T>(value: Option<&T>, stage: Stage) -> Result<&T, StageFailure> {
    value.ok_or_else(|| {
        StageFailure::Attach(AttachError::MissingUpstream {
            stage,
            requires: stage.previous().unwrap_or(stage),
        })
    })
}

/// Reference of an output that is already attached to the item
fn attached_reference(item: &ContentItem, stage: Stage) -> Option<String> {
    let output = match stage {
        Stage::Extracting => StageOutput::Extracted(item.extracted()?.clone()),
        Stage::Summarizing => StageOutput::Summary(item.summary()?.clone()),
        Stage::Scripting => StageOutput::Script(item.script()?.clone()),
        Stage::Synthesizing => StageOutput::Audio(item.audio()?.clone()),
        Stage::Archiving => StageOutput::Published(item.publication()?.clone()),
    };
    Some(output.reference())
}

fn tally(report: &mut SourceReport, joined: Result<Result<PipelineRun>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(run)) => match run.state {
            RunState::Published { .. } => report.published += 1,
            RunState::Failed { .. } => report.failed += 1,
            RunState::Cancelled { .. } => report.cancelled += 1,
            _ => report.errors += 1,
        },
        Ok(Err(e)) if e.downcast_ref::<ItemBusy>().is_some() => {
            debug!(error = %e, "Item skipped");
            report.busy += 1;
        }
        Ok(Err(e)) => {
            error!(error = %format!("{:#}", e), "Item processing errored");
            report.errors += 1;
        }
        Err(e) => {
            error!(error = %e, "Worker task panicked");
            report.errors += 1;
        }
    }
}
