//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `ONTOLOOM_*` environment overrides. String values support `${VAR}`
//! expansion so secrets can be referenced rather than written into files.
//! The engine core never reads the environment directly; everything arrives
//! through [`OntoloomConfig`] at construction.

use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Expands environment variable references in a string.
///
/// Supports `${VAR_NAME}` syntax. If the variable is not set, the original
/// reference is preserved.
fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut result = input.to_string();
    let mut start = 0;

    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        if let Some(var_end) = result[var_start..].find('}') {
            let var_end = var_start + var_end;
            let var_name = &result[var_start + 2..var_end];
            if let Ok(value) = std::env::var(var_name) {
                result.replace_range(var_start..=var_end, &value);
                start = var_start + value.len();
            } else {
                start = var_end + 1;
            }
        } else {
            break;
        }
    }

    Cow::Owned(result)
}

/// Main configuration for the engine.
#[derive(Debug, Clone)]
pub struct OntoloomConfig {
    /// Path to the metadata store database file.
    pub store_path: PathBuf,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// Worker-pool configuration.
    pub pool: PoolConfig,
    /// Workflow engine configuration.
    pub workflow: WorkflowConfig,
    /// Audit sink selection: "stdout" or "tracing".
    pub audit_sink: String,
    /// Config files that were loaded (for debugging).
    pub config_sources: Vec<PathBuf>,
}

impl Default for OntoloomConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("ontoloom.db"),
            llm: LlmConfig::default(),
            pool: PoolConfig::default(),
            workflow: WorkflowConfig::default(),
            audit_sink: "stdout".to_string(),
            config_sources: Vec::new(),
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider name: "anthropic" or "ollama".
    pub provider: String,
    /// Model name.
    pub model: Option<String>,
    /// API key; `${VAR}` references are expanded at load time.
    pub api_key: Option<SecretString>,
    /// Base URL for self-hosted providers.
    pub base_url: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum attempts per LLM call (first try plus retries).
    pub max_attempts: u32,
    /// Initial retry backoff in milliseconds; doubles per retry.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before the circuit opens.
    pub breaker_threshold: u32,
    /// How long the circuit stays open before a half-open probe, in
    /// milliseconds.
    pub breaker_reset_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
            max_attempts: 3,
            retry_backoff_ms: 500,
            breaker_threshold: 5,
            breaker_reset_ms: 30_000,
        }
    }
}

/// Worker-pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker slots.
    pub max_concurrent: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

/// Workflow engine configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Heartbeat update interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Age after which a heartbeat is considered expired and the workflow
    /// abandoned, in milliseconds.
    pub heartbeat_expiry_ms: u64,
    /// Row limit clamp for approved-query execution.
    pub max_query_rows: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            heartbeat_expiry_ms: 60_000,
            max_query_rows: 1000,
        }
    }
}

/// On-disk TOML shape; every field optional so partial files merge over
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    store_path: Option<String>,
    audit_sink: Option<String>,
    llm: Option<FileLlmConfig>,
    pool: Option<FilePoolConfig>,
    workflow: Option<FileWorkflowConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLlmConfig {
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    breaker_threshold: Option<u32>,
    breaker_reset_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePoolConfig {
    max_concurrent: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileWorkflowConfig {
    heartbeat_interval_ms: Option<u64>,
    heartbeat_expiry_ms: Option<u64>,
    max_query_rows: Option<usize>,
}

impl OntoloomConfig {
    /// Loads configuration: defaults, then the given TOML file (if any),
    /// then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the file exists but cannot be
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            if path.exists() {
                config.merge_file(path)?;
                config.config_sources.push(path.to_path_buf());
            }
        }
        config.apply_env_overrides();
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config", format!("{}: {e}", path.display())))?;
        let file: FileConfig = toml::from_str(&raw)
            .map_err(|e| Error::InvalidInput(format!("config {}: {e}", path.display())))?;

        if let Some(store_path) = file.store_path {
            self.store_path = PathBuf::from(expand_env_vars(&store_path).into_owned());
        }
        if let Some(sink) = file.audit_sink {
            self.audit_sink = sink;
        }
        if let Some(llm) = file.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(model) = llm.model {
                self.llm.model = Some(model);
            }
            if let Some(api_key) = llm.api_key {
                let expanded = expand_env_vars(&api_key).into_owned();
                self.llm.api_key = Some(SecretString::from(expanded));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(expand_env_vars(&base_url).into_owned());
            }
            if let Some(v) = llm.timeout_ms {
                self.llm.timeout_ms = v;
            }
            if let Some(v) = llm.connect_timeout_ms {
                self.llm.connect_timeout_ms = v;
            }
            if let Some(v) = llm.max_attempts {
                self.llm.max_attempts = v.max(1);
            }
            if let Some(v) = llm.retry_backoff_ms {
                self.llm.retry_backoff_ms = v;
            }
            if let Some(v) = llm.breaker_threshold {
                self.llm.breaker_threshold = v.max(1);
            }
            if let Some(v) = llm.breaker_reset_ms {
                self.llm.breaker_reset_ms = v;
            }
        }
        if let Some(pool) = file.pool {
            if let Some(v) = pool.max_concurrent {
                self.pool.max_concurrent = v.max(1);
            }
        }
        if let Some(workflow) = file.workflow {
            if let Some(v) = workflow.heartbeat_interval_ms {
                self.workflow.heartbeat_interval_ms = v.max(1);
            }
            if let Some(v) = workflow.heartbeat_expiry_ms {
                self.workflow.heartbeat_expiry_ms = v.max(1);
            }
            if let Some(v) = workflow.max_query_rows {
                self.workflow.max_query_rows = v.max(1);
            }
        }
        Ok(())
    }

    /// Applies `ONTOLOOM_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ONTOLOOM_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ONTOLOOM_AUDIT_SINK") {
            self.audit_sink = v;
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_MODEL") {
            self.llm.model = Some(v);
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(v));
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.llm.timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_MAX_ATTEMPTS") {
            if let Ok(parsed) = v.parse::<u32>() {
                self.llm.max_attempts = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_RETRY_BACKOFF_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.llm.retry_backoff_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_BREAKER_THRESHOLD") {
            if let Ok(parsed) = v.parse::<u32>() {
                self.llm.breaker_threshold = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_LLM_BREAKER_RESET_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.llm.breaker_reset_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_POOL_MAX_CONCURRENT") {
            if let Ok(parsed) = v.parse::<usize>() {
                self.pool.max_concurrent = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_HEARTBEAT_INTERVAL_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.workflow.heartbeat_interval_ms = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var("ONTOLOOM_HEARTBEAT_EXPIRY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.workflow.heartbeat_expiry_ms = parsed.max(1);
            }
        }
    }
}
