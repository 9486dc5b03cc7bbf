//! Application configuration for auditdoc.
//!
//! User config lives at `~/.auditdoc/auditdoc.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AuditDocError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "auditdoc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".auditdoc";

// ---------------------------------------------------------------------------
// Config structs (matching auditdoc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream source-of-truth system.
    #[serde(default)]
    pub source: SourceConfig,

    /// Canonical document cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Template and manifest location.
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Where rendered documents are uploaded.
    #[serde(default)]
    pub output: OutputConfig,

    /// Request-level generation limits.
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the upstream API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per fetch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Page size for the review-area controls endpoint.
    #[serde(default = "default_controls_page_size")]
    pub controls_page_size: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            controls_page_size: default_controls_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.example.gov/v1".into()
}
fn default_token_env() -> String {
    "AUDITDOC_SOURCE_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_controls_page_size() -> u32 {
    1000
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the libSQL cache database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum age of a cached document before it is refetched.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_db_path() -> String {
    "~/.auditdoc/cache.db".into()
}
fn default_ttl_secs() -> u64 {
    3600
}

/// `[templates]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Directory holding `<id>.docx` and `<id>.manifest.json`.
    #[serde(default = "default_templates_dir")]
    pub dir: String,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
        }
    }
}

fn default_templates_dir() -> String {
    "templates".into()
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Local directory rendered documents are written to.
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "var/reports".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Whole-request budget in seconds.
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            budget_secs: default_budget_secs(),
        }
    }
}

fn default_budget_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.auditdoc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AuditDocError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.auditdoc/auditdoc.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| AuditDocError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AuditDocError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AuditDocError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AuditDocError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AuditDocError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the upstream bearer token from the env var named in config.
pub fn source_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.source.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(AuditDocError::config(format!(
            "source token not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
