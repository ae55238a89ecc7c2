//! Per-item run store with file-based persistence.
//!
//! Each content item gets its own directory under the runs root:
//!
//! ```text
//! runs/<id>/
//!   events.jsonl     append-only event log (source of truth)
//!   item.json        ContentItem with every attached output
//!   audio.bin        audio payload of the attached AudioAsset
//!   checkpoint.json  last completed stage, retry count, last error
//!   .lock            advisory lock held by the worker owning the item
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::warn;

use crate::domain::{hash_text, ContentId, ContentItem, Event, PipelineRun, Stage};

const EVENTS_FILE: &str = "events.jsonl";
const ITEM_FILE: &str = "item.json";
const AUDIO_FILE: &str = "audio.bin";
const CHECKPOINT_FILE: &str = "checkpoint.json";
const LOCK_FILE: &str = ".lock";

/// Summary of where a run stands, rewritten after every stage boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub item_id: ContentId,

    /// Run state label (pending, summarizing, failed...)
    pub state: String,

    pub last_completed_stage: Option<Stage>,

    /// Output reference of the last completed stage
    pub reference: Option<String>,

    /// Retries across all stages
    pub retry_count: u32,

    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn from_run(run: &PipelineRun) -> Self {
        let last_completed_stage = run.last_completed_stage();
        Self {
            item_id: run.item_id.clone(),
            state: run.state.label().to_string(),
            last_completed_stage,
            reference: last_completed_stage
                .and_then(|stage| run.outcomes.get(&stage))
                .and_then(|outcome| outcome.reference.clone()),
            retry_count: run.retry_counts.values().sum(),
            last_error: run.last_error().map(str::to_string),
            updated_at: run.updated_at,
        }
    }
}

/// File-based store for every item's run
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Store rooted at an explicit directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store at the configured runs directory (~/.newspeaker/runs or $NEWSPEAKER_HOME/runs)
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::config::runs_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the run directory of an item
    pub fn run_dir(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn events_path(&self, id: &ContentId) -> PathBuf {
        self.run_dir(id).join(EVENTS_FILE)
    }

    pub fn lock_path(&self, id: &ContentId) -> PathBuf {
        self.run_dir(id).join(LOCK_FILE)
    }

    /// Create the run directory if needed
    pub async fn ensure_dir(&self, id: &ContentId) -> Result<PathBuf> {
        let dir = self.run_dir(id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Append an event to its item's log
    pub async fn append(&self, event: &Event) -> Result<()> {
        self.ensure_dir(&event.item_id).await?;
        let events_path = self.events_path(&event.item_id);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", events_path.display()))?;

        let end = drop_torn_tail(&mut file, &event.item_id).await?;
        file.seek(SeekFrom::Start(end))
            .await
            .context("Failed to seek events file")?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events of an item in order
    pub async fn replay(&self, id: &ContentId) -> Result<Vec<Event>> {
        let events_path = self.events_path(id);
        if !events_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&events_path)
            .await
            .with_context(|| format!("Failed to read events file: {}", events_path.display()))?;

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                // A torn final line is an append that never finished
                Err(e) if index + 1 == lines.len() => {
                    warn!(item_id = %id, error = %e, "Ignoring incomplete last event");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to parse event: {}", line));
                }
            }
        }

        Ok(events)
    }

    /// Rebuild the run of an item from its log
    pub async fn load_run(&self, id: &ContentId) -> Result<Option<PipelineRun>> {
        let events = self.replay(id).await?;
        Ok(PipelineRun::from_events(&events))
    }

    /// Persist the item snapshot (audio bytes go to their own file)
    pub async fn save_item(&self, item: &ContentItem) -> Result<()> {
        let dir = self.ensure_dir(item.id()).await?;

        if let Some(audio) = item.audio() {
            write_atomic(&dir.join(AUDIO_FILE), &audio.data).await?;
        }

        let json = serde_json::to_vec_pretty(item).context("Failed to serialize item")?;
        write_atomic(&dir.join(ITEM_FILE), &json).await
    }

    pub async fn load_item(&self, id: &ContentId) -> Result<Option<ContentItem>> {
        let dir = self.run_dir(id);
        let item_path = dir.join(ITEM_FILE);
        if !item_path.exists() {
            return Ok(None);
        }

        let content = fs::read(&item_path)
            .await
            .with_context(|| format!("Failed to read item: {}", item_path.display()))?;
        let mut item: ContentItem = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse item: {}", item_path.display()))?;

        if item.audio().is_some() {
            let audio_path = dir.join(AUDIO_FILE);
            let data = fs::read(&audio_path)
                .await
                .with_context(|| format!("Failed to read audio: {}", audio_path.display()))?;
            item.restore_audio_data(data);
        }

        Ok(Some(item))
    }

    pub async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.ensure_dir(&checkpoint.item_id).await?;
        let json = serde_json::to_vec_pretty(checkpoint).context("Failed to serialize checkpoint")?;
        write_atomic(&dir.join(CHECKPOINT_FILE), &json).await
    }

    pub async fn load_checkpoint(&self, id: &ContentId) -> Result<Option<Checkpoint>> {
        let path = self.run_dir(id).join(CHECKPOINT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;
        let checkpoint = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse checkpoint: {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    /// List all item ids with a run directory
    pub async fn list_runs(&self) -> Result<Vec<ContentId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(id) = entry.file_name().to_str().and_then(ContentId::parse) {
                    runs.push(id);
                }
            }
        }

        runs.sort();
        Ok(runs)
    }
}

/// Cut an unterminated last line left by an interrupted append.
///
/// Returns the length of the log once it ends on a line boundary.
async fn drop_torn_tail(file: &mut File, id: &ContentId) -> Result<u64> {
    let len = file
        .metadata()
        .await
        .context("Failed to stat events file")?
        .len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut content).await?;
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos as u64 + 1)
        .unwrap_or(0);

    warn!(item_id = %id, dropped_bytes = len - keep, "Dropping incomplete last event");
    file.set_len(keep)
        .await
        .context("Failed to truncate events file")?;
    Ok(keep)
}

/// Write a file so readers never observe a partial version
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let target = path.to_path_buf();
    let bytes = bytes.to_vec();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(&bytes).context("Failed to write temp file")?;
        tmp.as_file().sync_all().context("Failed to sync temp file")?;
        tmp.persist(&target)
            .with_context(|| format!("Failed to persist {}", target.display()))?;
        Ok(())
    })
    .await
    .context("Atomic write task panicked")?
}

/// Generate an idempotency key for a stage
pub fn generate_idempotency_key(id: &ContentId, stage: Stage, input: &str) -> String {
    format!("{}:{}:{}", id, stage, hash_text(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, ExtractedText, StageStatus};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_item() -> ContentItem {
        let published = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        ContentItem::new("https://example.com/news/1", "Breaking news: markets rise.", published)
    }

    fn create_test_store() -> (RunStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RunStore::new(temp_dir.path().join("runs"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let (store, _temp) = create_test_store();
        let id = sample_item().id().clone();

        let event1 = Event::new(
            id.clone(),
            None,
            EventType::RunStarted,
            format!("{}:start", id),
            "Run started".to_string(),
            StageStatus::Running,
        );
        let event2 = Event::new(
            id.clone(),
            Some(Stage::Extracting),
            EventType::StageStarted,
            generate_idempotency_key(&id, Stage::Extracting, "payload"),
            "Stage started".to_string(),
            StageStatus::Running,
        );

        store.append(&event1).await.unwrap();
        store.append(&event2).await.unwrap();

        let events = store.replay(&id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[1].event_type, EventType::StageStarted);
        assert_eq!(store.list_runs().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_replay_ignores_torn_last_line() {
        let (store, _temp) = create_test_store();
        let id = sample_item().id().clone();

        let started = Event::new(
            id.clone(),
            None,
            EventType::RunStarted,
            format!("{}:start", id),
            "Run started".to_string(),
            StageStatus::Running,
        );
        store.append(&started).await.unwrap();

        let path = store.events_path(&id);
        let mut content = fs::read_to_string(&path).await.unwrap();
        content.push_str("{\"id\":\"trunc");
        fs::write(&path, &content).await.unwrap();

        assert_eq!(store.replay(&id).await.unwrap().len(), 1);

        // Garbage before the last line is corruption, not a torn append
        content.push_str("\n");
        content.push_str(&serde_json::to_string(&started).unwrap());
        fs::write(&path, &content).await.unwrap();
        assert!(store.replay(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_append_after_torn_line_keeps_log_readable() {
        let (store, _temp) = create_test_store();
        let id = sample_item().id().clone();
        let event = |event_type| {
            Event::new(
                id.clone(),
                None,
                event_type,
                format!("{}:{:?}", id, event_type),
                "test".to_string(),
                StageStatus::Running,
            )
        };

        store.append(&event(EventType::RunStarted)).await.unwrap();
        let path = store.events_path(&id);
        let mut content = fs::read_to_string(&path).await.unwrap();
        content.push_str("{\"id\":\"trunc");
        fs::write(&path, &content).await.unwrap();

        store.append(&event(EventType::RunResumed)).await.unwrap();
        store.append(&event(EventType::RunCancelled)).await.unwrap();

        let types: Vec<EventType> = store
            .replay(&id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![EventType::RunStarted, EventType::RunResumed, EventType::RunCancelled]
        );
        assert!(!fs::read_to_string(&path).await.unwrap().contains("trunc"));
    }

    #[tokio::test]
    async fn test_item_snapshot_roundtrip_restores_audio() {
        use crate::domain::{AudioAsset, NarrativeStyle, Script, Summary, TtsBackendId};

        let (store, _temp) = create_test_store();
        let mut item = sample_item();
        let text = ExtractedText::new("Breaking news: markets rise.".to_string(), "en", 1.0);
        item.attach_extracted(text.clone()).unwrap();
        item.attach_summary(Summary::new("Markets rose today.".to_string(), 200, &text, "test"))
            .unwrap();
        item.attach_script(Script {
            text: "Markets rose today.".to_string(),
            style: NarrativeStyle::Educational,
            summary_hash: hash_text("Markets rose today."),
            language: "en".to_string(),
            words_per_minute: 150,
            word_count: 3,
            estimated_duration_secs: 1,
        })
        .unwrap();
        item.attach_audio(AudioAsset {
            data: vec![1, 2, 3, 4],
            format: "wav".to_string(),
            duration_secs: 1.2,
            sample_rate: 16000,
            script_hash: hash_text("Markets rose today."),
            backend: TtsBackendId::Silence,
            voice: "default".to_string(),
        })
        .unwrap();

        store.save_item(&item).await.unwrap();
        let loaded = store.load_item(item.id()).await.unwrap().unwrap();

        assert_eq!(loaded.audio().unwrap().data, vec![1, 2, 3, 4]);
        assert_eq!(loaded.summary(), item.summary());
        assert!(store.load_item(&ContentId::parse("ffffffffffffffff").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let (store, _temp) = create_test_store();
        let id = sample_item().id().clone();
        let checkpoint = Checkpoint {
            item_id: id.clone(),
            state: "summarizing".to_string(),
            last_completed_stage: Some(Stage::Extracting),
            reference: Some("text:abc".to_string()),
            retry_count: 2,
            last_error: Some("timeout".to_string()),
            updated_at: Utc::now(),
        };

        store.write_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(store.load_checkpoint(&id).await.unwrap(), Some(checkpoint));
    }

    #[test]
    fn test_idempotency_key_format() {
        let id = ContentId::parse("0123456789abcdef").unwrap();
        let key = generate_idempotency_key(&id, Stage::Summarizing, "test input");

        // Format: {item_id}:{stage}:{hash16}
        assert!(key.starts_with("0123456789abcdef:summarizing:"));
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 16);
    }
}
