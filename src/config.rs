//! Configuration for newspeaker.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (NEWSPEAKER_HOME, NEWSPEAKER_LIBRARY)
//! 2. Config file (.newspeaker/config.yaml)
//! 3. Defaults (~/.newspeaker)
//!
//! Config file discovery:
//! - Searches current directory and parents for .newspeaker/config.yaml
//! - `paths.home` is relative to the .newspeaker/ directory, `paths.library`
//!   to the project root that contains it

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::espeak::DEFAULT_ESPEAK_BINARY;
use crate::adapters::ollama::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use crate::core::PipelineSettings;

const CONFIG_DIR: &str = ".newspeaker";
const HOME_ENV: &str = "NEWSPEAKER_HOME";
const LIBRARY_ENV: &str = "NEWSPEAKER_LIBRARY";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineSettings>,
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .newspeaker/)
    pub home: Option<String>,
    /// Library directory (relative to the project root)
    pub library: Option<String>,
}

/// Endpoints and binaries of the stage backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub ollama: Option<OllamaConfig>,
    #[serde(default)]
    pub speech: Option<SpeechConfig>,
    #[serde(default)]
    pub espeak: Option<EspeakConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}
fn default_ollama_model() -> String {
    DEFAULT_OLLAMA_MODEL.to_string()
}

/// OpenAI-compatible speech endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub url: String,
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Voices the endpoint accepts (empty: any)
    #[serde(default)]
    pub voices: Vec<String>,

    #[serde(default)]
    pub default_voice: Option<String>,
}

impl SpeechConfig {
    /// API key read from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EspeakConfig {
    #[serde(default = "default_espeak_binary")]
    pub binary: String,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
}

fn default_espeak_binary() -> String {
    DEFAULT_ESPEAK_BINARY.to_string()
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (runs, cache)
    pub home: PathBuf,
    /// Published episodes
    pub library: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    pub backends: BackendsConfig,
}

impl ResolvedConfig {
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    resolve_config(
        find_config_file(),
        default_home,
        std::env::var(HOME_ENV).ok(),
        std::env::var(LIBRARY_ENV).ok(),
    )
}

fn resolve_config(
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env_home: Option<String>,
    env_library: Option<String>,
) -> Result<ResolvedConfig> {
    let config = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .newspeaker/ and the project root above it
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(_)) = (config.paths.home.as_deref(), config_file.as_ref()) {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let library = if let Some(env_lib) = env_library {
        PathBuf::from(env_lib)
    } else if let (Some(lib_path), Some(_)) = (config.paths.library.as_deref(), config_file.as_ref()) {
        resolve_path(base_dir, lib_path)
    } else {
        home.join("library")
    };

    let pipeline = config.pipeline.unwrap_or_default();
    pipeline.validate()?;

    Ok(ResolvedConfig {
        home,
        library,
        config_file,
        pipeline,
        backends: config.backends,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (bypasses the cache)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the newspeaker home directory (engine state)
pub fn newspeaker_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($NEWSPEAKER_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the artifact cache directory ($NEWSPEAKER_HOME/cache)
pub fn cache_dir() -> Result<PathBuf> {
    Ok(config()?.cache_dir())
}

/// Get the library directory
pub fn library_dir() -> Result<PathBuf> {
    Ok(config()?.library.clone())
}
