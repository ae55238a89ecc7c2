//! Command-line interface for newspeaker.
//!
//! Provides commands for running a news source through the pipeline,
//! checking status, listing runs, resuming failed runs, and browsing the
//! published episodes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{
    EspeakBackend, ExtractiveSummarizer, HtmlExtractor, HttpSpeechBackend, JsonlSource,
    LibraryArchiver, OllamaSummarizer, SilenceBackend, Summarizer,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    ArtifactCache, BackendRegistry, PipelineOrchestrator, PipelineStages, RunStore, Scriptwriter,
    Synthesizer,
};
use crate::domain::{ContentId, RunState, Stage};
use crate::library::Library;

/// newspeaker - Resumable news-to-audio pipeline
#[derive(Parser, Debug)]
#[command(name = "newspeaker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Turn every article of a news JSONL file into an episode
    Run {
        /// News items, one JSON object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Narrative style (educational, conversational, humorous, ...)
        #[arg(short, long)]
        style: Option<String>,

        /// TTS backend (silence, espeak, http_speech)
        #[arg(short, long)]
        backend: Option<String>,

        /// Backend-specific voice name
        #[arg(long)]
        voice: Option<String>,

        /// Speaking rate in words per minute
        #[arg(long)]
        rate: Option<u32>,

        /// Items processed at the same time
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Summarizer (defaults to ollama when configured)
        #[arg(long, value_enum)]
        summarizer: Option<SummarizerKind>,

        /// Do not reuse cached summaries, scripts or audio
        #[arg(long)]
        no_cache: bool,
    },

    /// Check the status of an item's run
    Status {
        /// Item ID (16 hex characters)
        item_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Resume a failed or cancelled run
    Resume {
        /// Item ID to resume
        item_id: String,

        #[arg(long, value_enum)]
        summarizer: Option<SummarizerKind>,
    },

    /// List registered narrative styles
    Styles,

    /// List registered TTS backends
    Backends,

    /// List published episodes
    Episodes {
        /// Only episodes whose title or URL contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Maximum number of episodes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummarizerKind {
    /// Sentence scoring, fully offline
    Extractive,

    /// Ollama chat model
    Ollama,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                input,
                style,
                backend,
                voice,
                rate,
                concurrency,
                summarizer,
                no_cache,
            } => {
                let request = RunRequest {
                    input,
                    style,
                    backend,
                    voice,
                    rate,
                    concurrency,
                    summarizer,
                    no_cache,
                };
                run_source(request).await
            }
            Commands::Status { item_id } => show_status(&item_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Resume { item_id, summarizer } => resume_run(&item_id, summarizer).await,
            Commands::Styles => list_styles(),
            Commands::Backends => list_backends(),
            Commands::Episodes { search, limit } => list_episodes(search, limit).await,
            Commands::Config => show_config(),
        }
    }
}

struct RunRequest {
    input: PathBuf,
    style: Option<String>,
    backend: Option<String>,
    voice: Option<String>,
    rate: Option<u32>,
    concurrency: Option<usize>,
    summarizer: Option<SummarizerKind>,
    no_cache: bool,
}

/// Build the orchestrator described by the configuration
pub fn build_orchestrator(
    cfg: &ResolvedConfig,
    summarizer: Option<SummarizerKind>,
    use_cache: bool,
) -> Result<PipelineOrchestrator> {
    let settings = cfg.pipeline.clone();

    let summarizer: Arc<dyn Summarizer> = match (summarizer, &cfg.backends.ollama) {
        (Some(SummarizerKind::Extractive), _) | (None, None) => Arc::new(ExtractiveSummarizer::new()),
        (_, ollama) => {
            let (url, model, timeout) = ollama
                .as_ref()
                .map(|o| (o.url.clone(), o.model.clone(), o.timeout_seconds))
                .unwrap_or_else(|| {
                    (
                        crate::adapters::ollama::DEFAULT_OLLAMA_URL.to_string(),
                        crate::adapters::ollama::DEFAULT_OLLAMA_MODEL.to_string(),
                        None,
                    )
                });
            let timeout = timeout.unwrap_or(settings.timeout(Stage::Summarizing).as_secs());
            Arc::new(OllamaSummarizer::new(url, model).with_timeout(Duration::from_secs(timeout)))
        }
    };

    let stages = PipelineStages {
        extractor: Arc::new(HtmlExtractor::from_settings(&settings)),
        summarizer,
        scriptwriter: Scriptwriter::with_builtin_styles(),
        synthesizer: Synthesizer::new(backend_registry(cfg)),
        archiver: Arc::new(LibraryArchiver::new(Library::new(&cfg.library))),
    };

    let orchestrator = PipelineOrchestrator::new(RunStore::new(cfg.runs_dir()), settings, stages);
    Ok(if use_cache {
        orchestrator.with_cache(ArtifactCache::new(cfg.cache_dir()))
    } else {
        orchestrator
    })
}

/// Every TTS backend the configuration enables
fn backend_registry(cfg: &ResolvedConfig) -> BackendRegistry {
    let registry = BackendRegistry::new();
    registry.register(Arc::new(SilenceBackend::new()));

    let espeak = match &cfg.backends.espeak {
        Some(espeak) => {
            let backend = EspeakBackend::new(espeak.binary.clone());
            match &espeak.languages {
                Some(languages) => backend.with_languages(languages.clone()),
                None => backend,
            }
        }
        None => EspeakBackend::default(),
    };
    registry.register(Arc::new(espeak));

    if let Some(speech) = &cfg.backends.speech {
        let mut backend = HttpSpeechBackend::new(speech.url.clone(), speech.model.clone())
            .with_api_key(speech.api_key())
            .with_voices(speech.voices.clone())
            .with_timeout(cfg.pipeline.timeout(Stage::Synthesizing));
        if let Some(voice) = &speech.default_voice {
            backend = backend.with_default_voice(voice.clone());
        }
        registry.register(Arc::new(backend));
    }

    registry
}

fn parse_item_id(raw: &str) -> Result<ContentId> {
    ContentId::parse(raw).with_context(|| format!("Invalid item ID: {}", raw))
}

/// Process every item of a JSONL news file
async fn run_source(request: RunRequest) -> Result<()> {
    let cfg = config::config()?;
    let mut options = cfg.pipeline.default_options();
    if let Some(style) = request.style {
        options.style = style.parse().unwrap_or_default();
    }
    if let Some(backend) = request.backend {
        options.backend = backend.parse().unwrap_or_default();
    }
    if let Some(voice) = request.voice {
        options.voice.voice = voice;
    }
    if request.rate.is_some() {
        options.voice.speaking_rate = request.rate;
    }

    let mut cfg = cfg.clone();
    if let Some(concurrency) = request.concurrency {
        cfg.pipeline.max_concurrent_items = concurrency.max(1);
    }

    let orchestrator = build_orchestrator(&cfg, request.summarizer, !request.no_cache)?;
    if !orchestrator.stages().scriptwriter.registry().contains(&options.style) {
        anyhow::bail!("Unknown narrative style '{}'. See `newspeaker styles`", options.style);
    }
    if orchestrator.stages().synthesizer.backends().get(&options.backend).is_none() {
        anyhow::bail!("Unknown TTS backend '{}'. See `newspeaker backends`", options.backend);
    }

    let source = JsonlSource::new(&request.input);
    eprintln!(
        "Processing {} (style: {}, backend: {})",
        request.input.display(),
        options.style,
        options.backend
    );

    let report = Arc::new(orchestrator).run_source(&source, options).await?;

    println!("Published:  {}", report.published);
    println!("Failed:     {}", report.failed);
    if report.cancelled > 0 {
        println!("Cancelled:  {}", report.cancelled);
    }
    if report.busy > 0 {
        println!("Busy:       {}", report.busy);
    }
    println!("Duplicates: {}", report.duplicates);
    println!("Invalid:    {}", report.invalid);

    if report.failed > 0 || report.errors > 0 {
        eprintln!("\nUse 'newspeaker runs' to find failed items and 'newspeaker resume <id>' to retry them");
        std::process::exit(1);
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(item_id: &str) -> Result<()> {
    let id = parse_item_id(item_id)?;
    let orchestrator = build_orchestrator(config::config()?, None, false)?;

    let run = orchestrator
        .status(&id)
        .await?
        .with_context(|| format!("Run {} not found", id))?;

    println!("Item ID: {}", run.item_id);
    println!("State: {}", run.state.label());
    match &run.state {
        RunState::Published { reference } => println!("Published at: {}", reference),
        RunState::Failed { stage, reason } => println!("Failed at {}: {}", stage, reason),
        RunState::Cancelled { stage } => println!("Cancelled before: {}", stage),
        _ => {}
    }
    println!("Style: {}  Backend: {}  Voice: {}", run.options.style, run.options.backend, run.options.voice.voice);
    println!("Started: {}", run.started_at);
    println!("Updated: {}", run.updated_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if run.resumes > 0 {
        println!("Resumes: {}", run.resumes);
    }

    println!("\nStages:");
    for stage in Stage::ALL {
        let Some(outcome) = run.outcomes.get(&stage) else {
            println!("  {:<13} pending", stage.as_str());
            continue;
        };
        let retries = run.retry_count(stage);
        let mut line = format!("  {:<13} {:?} (attempts: {}", stage.as_str(), outcome.status, outcome.attempts);
        if retries > 0 {
            line.push_str(&format!(", retries: {}", retries));
        }
        line.push(')');
        if let Some(error) = &outcome.error {
            line.push_str(&format!(" - {}", error));
        }
        println!("{}", line);
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let orchestrator = build_orchestrator(config::config()?, None, false)?;
    let runs = orchestrator.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<18} {:<14} {:<16} {:<25}", "ITEM ID", "STATE", "STYLE", "UPDATED");
    println!("{}", "-".repeat(75));

    for run in runs {
        println!(
            "{:<18} {:<14} {:<16} {:<25}",
            run.item_id.as_str(),
            run.state.label(),
            run.options.style.name(),
            run.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Resume a failed run
async fn resume_run(item_id: &str, summarizer: Option<SummarizerKind>) -> Result<()> {
    let id = parse_item_id(item_id)?;
    let orchestrator = build_orchestrator(config::config()?, summarizer, true)?;

    let run = orchestrator.resume(&id).await?;

    match &run.state {
        RunState::Published { reference } => {
            println!("{}", reference);
            eprintln!("\n[Item {} published]", run.item_id);
        }
        RunState::Failed { stage, reason } => {
            eprintln!("\n[Item {} failed again at {}: {}]", run.item_id, stage, reason);
            std::process::exit(1);
        }
        _ => {
            eprintln!("\n[Item {} in state: {}]", run.item_id, run.state.label());
        }
    }

    Ok(())
}

fn list_styles() -> Result<()> {
    let scriptwriter = Scriptwriter::with_builtin_styles();

    println!("{:<16} {}", "STYLE", "DESCRIPTION");
    println!("{}", "-".repeat(70));
    for (name, description) in scriptwriter.registry().list() {
        println!("{:<16} {}", name, description);
    }

    Ok(())
}

fn list_backends() -> Result<()> {
    let cfg = config::config()?;

    for name in backend_registry(cfg).names() {
        let default = if name == cfg.pipeline.default_backend.name() {
            " (default)"
        } else {
            ""
        };
        println!("{}{}", name, default);
    }

    Ok(())
}

/// List published episodes
async fn list_episodes(search: Option<String>, limit: usize) -> Result<()> {
    let library = Library::open_default()?;
    let catalog = library.catalog().await?;

    if catalog.is_empty() {
        println!("Library is empty. Use 'newspeaker run --input <file>' to publish episodes.");
        return Ok(());
    }

    let mut entries = match &search {
        Some(query) => catalog.search(query),
        None => catalog.list(None),
    };
    entries.truncate(limit);

    println!("{:<18} {:<15} {:>8}  {:<45}", "ID", "STYLE", "SECONDS", "TITLE");
    println!("{}", "-".repeat(90));

    for entry in &entries {
        let title: String = if entry.title.chars().count() > 42 {
            format!("{}...", entry.title.chars().take(42).collect::<String>())
        } else {
            entry.title.clone()
        };
        println!(
            "{:<18} {:<15} {:>8.1}  {:<45}",
            entry.id.as_str(),
            entry.style.name(),
            entry.duration_secs,
            title
        );
    }

    println!(
        "\nTotal: {} episodes, {:.1} minutes",
        catalog.len(),
        catalog.total_duration_secs() / 60.0
    );

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Runs:                {}", cfg.runs_dir().display());
    println!("  Cache:               {}", cfg.cache_dir().display());
    println!("  Library (episodes):  {}", cfg.library.display());
    println!();
    println!("Pipeline:");
    println!("  Languages:         {}", cfg.pipeline.supported_languages.join(", "));
    println!("  Min extract chars: {}", cfg.pipeline.min_extract_chars);
    println!("  Max summary chars: {}", cfg.pipeline.max_summary_chars);
    println!("  Max payload:       {} bytes", cfg.pipeline.max_payload_bytes);
    println!("  Concurrency:       {}", cfg.pipeline.max_concurrent_items);
    println!("  Default style:     {}", cfg.pipeline.default_style);
    println!("  Default backend:   {}", cfg.pipeline.default_backend);
    println!();
    println!("Stages:");
    for stage in Stage::ALL {
        let policy = cfg.pipeline.retry_policy(stage);
        println!(
            "  {:<13} timeout {}s, {} attempts, backoff {}ms x{} (max {}ms)",
            stage.as_str(),
            cfg.pipeline.timeout(stage).as_secs(),
            policy.max_attempts,
            policy.initial_delay_ms,
            policy.backoff_multiplier,
            policy.max_delay_ms
        );
    }
    println!();
    println!("Backends:");
    match &cfg.backends.ollama {
        Some(ollama) => println!("  ollama: {} ({})", ollama.url, ollama.model),
        None => println!("  ollama: (not configured, extractive summarizer)"),
    }
    match &cfg.backends.speech {
        Some(speech) => println!(
            "  speech: {} ({}), key from {}",
            speech.url,
            speech.model,
            speech.api_key_env.as_deref().unwrap_or("(none)")
        ),
        None => println!("  speech: (not configured)"),
    }
    println!(
        "  espeak: {}",
        cfg.backends
            .espeak
            .as_ref()
            .map(|e| e.binary.as_str())
            .unwrap_or(crate::adapters::espeak::DEFAULT_ESPEAK_BINARY)
    );

    Ok(())
}
