//! Configuration for the irops pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (IROPS_HOME, IROPS_DB, IROPS_REASONING_ENDPOINT)
//! 2. Config file (.irops/config.yaml)
//! 3. Defaults (~/.irops)
//!
//! Config file discovery:
//! - Searches current directory and parents for .irops/config.yaml
//! - Relative paths in the config file are resolved against the .irops/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::router::RoutingRule;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub reasoning: ReasoningSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Agent name -> endpoint binding
    #[serde(default)]
    pub agents: HashMap<String, AgentEndpoint>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .irops/)
    pub home: Option<String>,
    /// SQLite decision database (relative to .irops/)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

/// Reasoning endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningSettings {
    /// OpenAI-compatible chat completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model used for event extraction
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,

    /// Model used for routing
    #[serde(default = "default_routing_model")]
    pub routing_model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// HTTP timeout per request in seconds
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_seconds: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_extraction_model() -> String {
    "gpt-4".to_string()
}
fn default_routing_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_reasoning_timeout() -> u64 {
    60
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            extraction_model: default_extraction_model(),
            routing_model: default_routing_model(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_reasoning_timeout(),
        }
    }
}

impl ReasoningSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Rate limiting and memoization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Token bucket capacity (burst size)
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity: f64,

    /// Tokens added per second
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,

    /// Hard cap on concurrent reasoning calls
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Sleep between failed bucket attempts
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Optional LRU cap on cached responses (unbounded when absent)
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

impl LimitSettings {
    /// Reject settings under which a reasoning call could wait forever
    pub fn validate(&self) -> Result<()> {
        if !self.bucket_capacity.is_finite() || self.bucket_capacity < 1.0 {
            anyhow::bail!(
                "limits.bucket_capacity must be at least 1 (got {})",
                self.bucket_capacity
            );
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            anyhow::bail!(
                "limits.refill_per_second must be greater than 0 (got {})",
                self.refill_per_second
            );
        }
        if self.max_in_flight == 0 {
            anyhow::bail!("limits.max_in_flight must be at least 1");
        }
        Ok(())
    }
}

fn default_bucket_capacity() -> f64 {
    3.0
}
fn default_refill_per_second() -> f64 {
    1.0
}
fn default_max_in_flight() -> usize {
    2
}
fn default_backoff_ms() -> u64 {
    50
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            bucket_capacity: default_bucket_capacity(),
            refill_per_second: default_refill_per_second(),
            max_in_flight: default_max_in_flight(),
            backoff_ms: default_backoff_ms(),
            cache_capacity: None,
        }
    }
}

/// Event extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Character budget per chunk
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Completion token cap per chunk
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_chunk_chars() -> usize {
    3000
}
fn default_max_tokens() -> u32 {
    1200
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Worker pool and recovery poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Number of concurrent worker loops
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between recovery sweeps
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Maximum decisions claimed per sweep
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Optional per-handler deadline in seconds
    #[serde(default)]
    pub handler_timeout_seconds: Option<u64>,
}

fn default_workers() -> usize {
    4
}
fn default_poll_interval() -> u64 {
    3
}
fn default_fetch_limit() -> usize {
    50
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_seconds: default_poll_interval(),
            fetch_limit: default_fetch_limit(),
            handler_timeout_seconds: None,
        }
    }
}

impl DispatchSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_seconds.map(Duration::from_secs)
    }
}

/// Where an external agent receives events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub webhook: String,
    /// Env var holding a bearer token, if the endpoint needs one
    #[serde(default)]
    pub token_env: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to irops home (state)
    pub home: PathBuf,
    /// Absolute path to the decision database
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub reasoning: ReasoningSettings,
    pub limits: LimitSettings,
    pub extraction: ExtractionSettings,
    pub dispatch: DispatchSettings,
    pub agents: HashMap<String, AgentEndpoint>,
    pub routing_rules: Vec<RoutingRule>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".irops").join("config.yaml");
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
        .join(".irops");

    let config_file = find_config_file();

    let mut resolved = match config_file {
        Some(ref config_path) => {
            let file = load_config_file(config_path)?;
            let irops_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_file(file, irops_dir, default_home)
        }
        None => ResolvedConfig {
            database: default_home.join("decisions.db"),
            home: default_home,
            config_file: None,
            reasoning: ReasoningSettings::default(),
            limits: LimitSettings::default(),
            extraction: ExtractionSettings::default(),
            dispatch: DispatchSettings::default(),
            agents: HashMap::new(),
            routing_rules: Vec::new(),
        },
    };
    resolved.config_file = config_file;

    apply_env_overrides(&mut resolved);
    resolved.limits.validate().context("Invalid rate limit settings")?;
    Ok(resolved)
}

fn resolve_file(file: ConfigFile, irops_dir: &Path, default_home: PathBuf) -> ResolvedConfig {
    let home = file
        .paths
        .home
        .as_deref()
        .map(|p| resolve_path(irops_dir, p))
        .unwrap_or(default_home);

    let database = file
        .paths
        .database
        .as_deref()
        .map(|p| resolve_path(irops_dir, p))
        .unwrap_or_else(|| home.join("decisions.db"));

    ResolvedConfig {
        home,
        database,
        config_file: None,
        reasoning: file.reasoning,
        limits: file.limits,
        extraction: file.extraction,
        dispatch: file.dispatch,
        agents: file.agents,
        routing_rules: file.routing.rules,
    }
}

fn apply_env_overrides(config: &mut ResolvedConfig) {
    if let Ok(home) = std::env::var("IROPS_HOME") {
        let home = PathBuf::from(home);
        // Database follows home unless pinned separately
        if config.database == config.home.join("decisions.db") {
            config.database = home.join("decisions.db");
        }
        config.home = home;
    }
    if let Ok(db) = std::env::var("IROPS_DB") {
        config.database = PathBuf::from(db);
    }
    if let Ok(endpoint) = std::env::var("IROPS_REASONING_ENDPOINT") {
        config.reasoning.endpoint = endpoint;
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
