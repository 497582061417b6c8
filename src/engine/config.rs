//! Engine configuration.
//!
//! This module provides configuration options for the ingest engine,
//! including workspace placement, the ingest API endpoints used for dataset
//! registration and status reporting, stage retries, and queue limits.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::status::StatusMethod;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the ingest engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Filesystem settings
    /// Directory under which per-run workspaces are created.
    pub workspace_root: PathBuf,
    /// Directory holding workflow descriptors and their manifests.
    pub pipeline_base_dir: PathBuf,
    /// Optional directory prepended to `PATH` for workflow tools.
    pub tool_bin_dir: Option<PathBuf>,
    /// Shell used to run stage command lines.
    pub shell: PathBuf,

    // Ingest API settings
    /// Base URL of the ingest API.
    pub ingest_api_url: String,
    /// Endpoint creating derived datasets.
    pub derived_dataset_endpoint: String,
    /// Endpoint receiving final status reports.
    pub status_endpoint: String,
    /// HTTP method used for status reports.
    pub status_method: StatusMethod,
    /// Timeout for ingest API calls.
    pub http_timeout: Duration,
    /// Whether encrypted tokens in trigger payloads are base64 encoded.
    pub decode_base64_tokens: bool,

    // Execution settings
    /// Retries applied uniformly to every stage when its process cannot start.
    pub stage_retries: u32,
    /// Delay between stage retries.
    pub retry_delay: Duration,
    /// Number of run log lines included in failure reports.
    pub log_tail_lines: usize,
    /// Threads handed to workflow tools that accept a thread count.
    pub workflow_threads: usize,
    /// Maximum number of runs executing at once.
    pub max_concurrent_runs: usize,
    /// Prefix added to every queue name.
    pub queue_prefix: String,
    /// Maximum concurrent stage processes per queue name.
    pub queue_slots: BTreeMap<String, usize>,

    // Metadata settings
    /// Schema file for run metadata; the embedded schema is used when unset.
    pub schema_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./ingest-tmp"),
            pipeline_base_dir: PathBuf::from("./pipelines"),
            tool_bin_dir: None,
            shell: PathBuf::from("/bin/sh"),

            ingest_api_url: "http://localhost:5000".to_string(),
            derived_dataset_endpoint: "/datasets/derived".to_string(),
            status_endpoint: "/datasets/status".to_string(),
            status_method: StatusMethod::Put,
            http_timeout: Duration::from_secs(60),
            decode_base64_tokens: true,

            stage_retries: 1,
            retry_delay: Duration::from_secs(60),
            log_tail_lines: 200,
            workflow_threads: 6,
            max_concurrent_runs: 4,
            queue_prefix: String::new(),
            queue_slots: BTreeMap::new(),

            schema_path: None,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `INGESTFLOW_WORKSPACE_ROOT`: Workspace root (default: ./ingest-tmp)
    /// - `INGESTFLOW_PIPELINE_BASE_DIR`: Workflow descriptor root (default: ./pipelines)
    /// - `INGESTFLOW_TOOL_BIN_DIR`: Directory prepended to `PATH` for tools
    /// - `INGESTFLOW_SHELL`: Shell for stage commands (default: /bin/sh)
    /// - `INGESTFLOW_API_URL`: Ingest API base URL (default: http://localhost:5000)
    /// - `INGESTFLOW_STATUS_METHOD`: PUT or POST (default: PUT)
    /// - `INGESTFLOW_HTTP_TIMEOUT_SECS`: Ingest API timeout (default: 60)
    /// - `INGESTFLOW_DECODE_BASE64_TOKENS`: Decode `crypt_auth_tok` as base64 (default: true)
    /// - `INGESTFLOW_STAGE_RETRIES`: Retries per stage (default: 1)
    /// - `INGESTFLOW_RETRY_DELAY_SECS`: Delay between retries (default: 60)
    /// - `INGESTFLOW_LOG_TAIL_LINES`: Log lines in failure reports (default: 200)
    /// - `INGESTFLOW_WORKFLOW_THREADS`: Threads for workflow tools (default: 6)
    /// - `INGESTFLOW_MAX_CONCURRENT_RUNS`: Concurrent runs (default: 4)
    /// - `INGESTFLOW_QUEUE_PREFIX`: Prefix for queue names
    /// - `INGESTFLOW_QUEUE_SLOTS`: Comma-separated `queue=slots` pairs
    /// - `INGESTFLOW_SCHEMA_PATH`: Metadata schema file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Filesystem settings
        if let Some(val) = lookup("INGESTFLOW_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("INGESTFLOW_PIPELINE_BASE_DIR") {
            config.pipeline_base_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("INGESTFLOW_TOOL_BIN_DIR") {
            config.tool_bin_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("INGESTFLOW_SHELL") {
            config.shell = PathBuf::from(val);
        }

        // Ingest API settings
        if let Some(val) = lookup("INGESTFLOW_API_URL") {
            config.ingest_api_url = val;
        }

        if let Some(val) = lookup("INGESTFLOW_STATUS_METHOD") {
            config.status_method = parse_env_value(&val, "INGESTFLOW_STATUS_METHOD")?;
        }

        if let Some(val) = lookup("INGESTFLOW_HTTP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "INGESTFLOW_HTTP_TIMEOUT_SECS")?;
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("INGESTFLOW_DECODE_BASE64_TOKENS") {
            config.decode_base64_tokens = parse_env_bool(&val, "INGESTFLOW_DECODE_BASE64_TOKENS")?;
        }

        // Execution settings
        if let Some(val) = lookup("INGESTFLOW_STAGE_RETRIES") {
            config.stage_retries = parse_env_value(&val, "INGESTFLOW_STAGE_RETRIES")?;
        }

        if let Some(val) = lookup("INGESTFLOW_RETRY_DELAY_SECS") {
            let secs: u64 = parse_env_value(&val, "INGESTFLOW_RETRY_DELAY_SECS")?;
            config.retry_delay = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("INGESTFLOW_LOG_TAIL_LINES") {
            config.log_tail_lines = parse_env_value(&val, "INGESTFLOW_LOG_TAIL_LINES")?;
        }

        if let Some(val) = lookup("INGESTFLOW_WORKFLOW_THREADS") {
            config.workflow_threads = parse_env_value(&val, "INGESTFLOW_WORKFLOW_THREADS")?;
        }

        if let Some(val) = lookup("INGESTFLOW_MAX_CONCURRENT_RUNS") {
            config.max_concurrent_runs = parse_env_value(&val, "INGESTFLOW_MAX_CONCURRENT_RUNS")?;
        }

        if let Some(val) = lookup("INGESTFLOW_QUEUE_PREFIX") {
            config.queue_prefix = val;
        }

        if let Some(val) = lookup("INGESTFLOW_QUEUE_SLOTS") {
            config.queue_slots = parse_queue_slots(&val, "INGESTFLOW_QUEUE_SLOTS")?;
        }

        // Metadata settings
        if let Some(val) = lookup("INGESTFLOW_SCHEMA_PATH") {
            config.schema_path = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_runs must be greater than 0".to_string(),
            ));
        }

        if self.workflow_threads == 0 {
            return Err(ConfigError::ValidationFailed(
                "workflow_threads must be greater than 0".to_string(),
            ));
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "http_timeout must be greater than 0".to_string(),
            ));
        }

        if self.ingest_api_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "ingest_api_url cannot be empty".to_string(),
            ));
        }

        if let Some((queue, _)) = self.queue_slots.iter().find(|(_, slots)| **slots == 0) {
            return Err(ConfigError::ValidationFailed(format!(
                "queue '{}' must allow at least one slot",
                queue
            )));
        }

        Ok(())
    }

    /// Full URL of an ingest API endpoint.
    pub fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.ingest_api_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Builder method to set the workspace root.
    pub fn with_workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_root = path.into();
        self
    }

    /// Builder method to set the pipeline base directory.
    pub fn with_pipeline_base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_base_dir = path.into();
        self
    }

    /// Builder method to set the ingest API base URL.
    pub fn with_ingest_api_url(mut self, url: impl Into<String>) -> Self {
        self.ingest_api_url = url.into();
        self
    }

    /// Builder method to set the status report method.
    pub fn with_status_method(mut self, method: StatusMethod) -> Self {
        self.status_method = method;
        self
    }

    /// Builder method to set stage retries.
    pub fn with_stage_retries(mut self, retries: u32) -> Self {
        self.stage_retries = retries;
        self
    }

    /// Builder method to set the delay between stage retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Builder method to set the number of log lines in failure reports.
    pub fn with_log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    /// Builder method to set the maximum number of concurrent runs.
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    /// Builder method to limit concurrent processes on a queue.
    pub fn with_queue_slots(mut self, queue: impl Into<String>, slots: usize) -> Self {
        self.queue_slots.insert(queue.into(), slots);
        self
    }

    /// Builder method to set the metadata schema file.
    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse `queue=slots` pairs separated by commas.
fn parse_queue_slots(value: &str, key: &str) -> Result<BTreeMap<String, usize>, ConfigError> {
    let mut slots = BTreeMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (queue, count) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected queue=slots, got '{}'", pair),
        })?;
        slots.insert(queue.trim().to_string(), parse_env_value(count, key)?);
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.stage_retries, 1);
        assert_eq!(config.status_method, StatusMethod::Put);
        assert_eq!(config.status_endpoint, "/datasets/status");
        assert_eq!(config.log_tail_lines, 200);
        assert!(config.schema_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("INGESTFLOW_WORKSPACE_ROOT", "/scratch/runs"),
            ("INGESTFLOW_STATUS_METHOD", "post"),
            ("INGESTFLOW_STAGE_RETRIES", "3"),
            ("INGESTFLOW_RETRY_DELAY_SECS", "5"),
            ("INGESTFLOW_QUEUE_SLOTS", "gpu000_q1=1, general=8"),
            ("INGESTFLOW_DECODE_BASE64_TOKENS", "off"),
        ]))
        .unwrap();

        assert_eq!(config.workspace_root, PathBuf::from("/scratch/runs"));
        assert_eq!(config.status_method, StatusMethod::Post);
        assert_eq!(config.stage_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.queue_slots.get("gpu000_q1"), Some(&1));
        assert_eq!(config.queue_slots.get("general"), Some(&8));
        assert!(!config.decode_base64_tokens);
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = EngineConfig::from_lookup(lookup_from(&[("INGESTFLOW_STAGE_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("INGESTFLOW_STAGE_RETRIES"));
    }

    #[test]
    fn test_from_lookup_rejects_malformed_slots() {
        let err = EngineConfig::from_lookup(lookup_from(&[("INGESTFLOW_QUEUE_SLOTS", "gpu")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validation_zero_slots() {
        let config = EngineConfig::new().with_queue_slots("gpu", 0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn test_validation_zero_concurrency() {
        let config = EngineConfig::new().with_max_concurrent_runs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_url_joins_slashes() {
        let config = EngineConfig::new().with_ingest_api_url("http://ingest:5000/");
        assert_eq!(
            config.api_url("/datasets/status"),
            "http://ingest:5000/datasets/status"
        );
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("YES", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(parse_env_bool("maybe", "test").is_err());
    }
}
