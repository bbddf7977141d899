//! Application configuration for phishlens.
//!
//! User config lives at `~/.phishlens/phishlens.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored here, only the name of the environment
//! variable that holds each one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PhishLensError, Result};
use crate::types::Service;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "phishlens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".phishlens";

// ---------------------------------------------------------------------------
// Config structs (matching phishlens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Artifact and cache locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// URL-reputation scanner settings.
    #[serde(default)]
    pub reputation: ReputationConfig,

    /// Sandbox-analysis service settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Findings report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for every CSV/JSON artifact.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Root of the per-service response caches.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "outputs".into()
}
fn default_cache_dir() -> String {
    "outputs/cache".into()
}

/// `[reputation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_reputation_key_env")]
    pub api_key_env: String,

    /// API root; lookups go to `{base_url}/urls/{id}`.
    #[serde(default = "default_reputation_base_url")]
    pub base_url: String,

    /// Prefix for human-readable permalinks.
    #[serde(default = "default_reputation_gui_base_url")]
    pub gui_base_url: String,

    /// Minimum ms between network lookups.
    #[serde(default = "default_reputation_rate_limit")]
    pub rate_limit_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Cap on URLs looked up per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_reputation_key_env(),
            base_url: default_reputation_base_url(),
            gui_base_url: default_reputation_gui_base_url(),
            rate_limit_ms: default_reputation_rate_limit(),
            request_timeout_secs: default_request_timeout(),
            limit: None,
        }
    }
}

fn default_reputation_key_env() -> String {
    "VT_API_KEY".into()
}
fn default_reputation_base_url() -> String {
    "https://www.virustotal.com/api/v3".into()
}
fn default_reputation_gui_base_url() -> String {
    "https://www.virustotal.com/gui/url".into()
}
fn default_reputation_rate_limit() -> u64 {
    15_000
}
fn default_request_timeout() -> u64 {
    30
}

/// `[sandbox]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_sandbox_key_env")]
    pub api_key_env: String,

    /// API root; submissions go to `{base_url}/scan/`.
    #[serde(default = "default_sandbox_base_url")]
    pub base_url: String,

    /// Scan visibility sent with each submission.
    #[serde(default = "default_visibility")]
    pub visibility: String,

    /// Minimum ms between submissions.
    #[serde(default = "default_sandbox_rate_limit")]
    pub rate_limit_ms: u64,

    /// Maximum result polls per submission.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Delay before each result poll.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Cap on URLs submitted per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_sandbox_key_env(),
            base_url: default_sandbox_base_url(),
            visibility: default_visibility(),
            rate_limit_ms: default_sandbox_rate_limit(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            limit: None,
        }
    }
}

fn default_sandbox_key_env() -> String {
    "URLSCAN_API_KEY".into()
}
fn default_sandbox_base_url() -> String {
    "https://urlscan.io/api/v1".into()
}
fn default_visibility() -> String {
    "public".into()
}
fn default_sandbox_rate_limit() -> u64 {
    20_000
}
fn default_poll_attempts() -> u32 {
    15
}
fn default_poll_interval() -> u64 {
    10_000
}

/// `[report]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Rows kept in the findings table.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Below this many flagged rows, back-fill with rare domains.
    #[serde(default = "default_min_flagged")]
    pub min_flagged: usize,

    /// How many of the least-seen domains are eligible for back-fill.
    #[serde(default = "default_rare_domains")]
    pub rare_domains: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_flagged: default_min_flagged(),
            rare_domains: default_rare_domains(),
        }
    }
}

fn default_top_n() -> usize {
    15
}
fn default_min_flagged() -> usize {
    5
}
fn default_rare_domains() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.phishlens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PhishLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.phishlens/phishlens.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| PhishLensError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PhishLensError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PhishLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PhishLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PhishLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Name of the env var that holds the key for `service`.
    pub fn api_key_env(&self, service: Service) -> &str {
        match service {
            Service::Reputation => &self.reputation.api_key_env,
            Service::Sandbox => &self.sandbox.api_key_env,
        }
    }
}

/// Read the API key for `service` from its configured env var.
///
/// Called once before any network activity; a missing key aborts the stage.
pub fn resolve_api_key(config: &AppConfig, service: Service) -> Result<String> {
    let var_name = config.api_key_env(service);
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(PhishLensError::missing_credential(service.as_str(), var_name)),
    }
}
