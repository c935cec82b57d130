//! Application configuration for EntityLens.
//!
//! User config lives at `~/.entitylens/entitylens.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EntityLensError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "entitylens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".entitylens";

// ---------------------------------------------------------------------------
// Config structs (matching entitylens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model endpoint.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search and gathering.
    #[serde(default)]
    pub search: SearchConfig,

    /// Retry policy for every external call.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Input/output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Batch execution.
    #[serde(default)]
    pub batch: BatchSettings,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature; omitted from requests when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:1234/v1".into()
}
fn default_model() -> String {
    "qwen/qwen3-4b-2507".into()
}
fn default_api_key_env() -> String {
    "ENTITYLENS_LLM_API_KEY".into()
}
fn default_llm_timeout() -> u64 {
    300
}

/// How the web-gathering stage turns search hits into entity context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatherMode {
    /// Concatenate the search engine's rendered snippets.
    #[default]
    Snippets,
    /// Fetch the result pages and keep only their query-relevant text.
    Ranked,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the SearXNG-compatible search service.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Number of results requested per query.
    #[serde(default = "default_num_results")]
    pub num_results: u32,

    /// Appended to every entity to build its query.
    #[serde(default = "default_query_suffix")]
    pub query_suffix: String,

    /// Per-request timeout for the search service.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Gathering strategy.
    #[serde(default)]
    pub gather_mode: GatherMode,

    /// Maximum pages fetched per entity in ranked mode.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    /// Per-page timeout in ranked mode.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            num_results: default_num_results(),
            query_suffix: default_query_suffix(),
            timeout_secs: default_search_timeout(),
            gather_mode: GatherMode::default(),
            max_documents: default_max_documents(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_search_base_url() -> String {
    "http://localhost:8080".into()
}
fn default_num_results() -> u32 {
    7
}
fn default_query_suffix() -> String {
    " review".into()
}
fn default_search_timeout() -> u64 {
    30
}
fn default_max_documents() -> usize {
    3
}
fn default_fetch_timeout() -> u64 {
    10
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying).
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base delay of the exponential backoff.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_base_delay() -> u64 {
    200
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Scraped video metadata (`tiktok_data_<id>.json`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Transcripts (`tiktok_video_<id>.txt`).
    #[serde(default = "default_transcripts_dir")]
    pub transcripts_dir: PathBuf,

    /// Persisted run records (`<id>.json`).
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,

    /// Optional directory with prompt template overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            transcripts_dir: default_transcripts_dir(),
            runs_dir: default_runs_dir(),
            prompts_dir: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_transcripts_dir() -> PathBuf {
    PathBuf::from("transcripts")
}
fn default_runs_dir() -> PathBuf {
    PathBuf::from("runs")
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Pipelines allowed to run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

impl LlmConfig {
    /// Read the API key from the configured env var, if set and non-empty.
    ///
    /// Local OpenAI-compatible servers accept anonymous requests, so a
    /// missing key is not an error.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|val| !val.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.entitylens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EntityLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.entitylens/entitylens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EntityLensError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        EntityLensError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EntityLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EntityLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EntityLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would make the pipeline misbehave silently.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.llm.base_url.trim().is_empty() {
        return Err(EntityLensError::config("llm.base_url must not be empty"));
    }
    if config.llm.model.trim().is_empty() {
        return Err(EntityLensError::config("llm.model must not be empty"));
    }
    if config.search.base_url.trim().is_empty() {
        return Err(EntityLensError::config("search.base_url must not be empty"));
    }
    if config.batch.concurrency == 0 {
        return Err(EntityLensError::config("batch.concurrency must be at least 1"));
    }
    Ok(())
}
