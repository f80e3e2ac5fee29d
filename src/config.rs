//! Runtime configuration
//!
//! Every section has working defaults, so an empty file (or no file at all)
//! yields a usable configuration. Values are layered:
//!
//! ```text
//! built-in defaults → TOML file (--config) → CODEBOX_* environment variables
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::sandbox::ResourceLimits;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolConfig,
    pub agent: AgentConfig,
    pub streaming: StreamConfig,
    pub provider: ProviderConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `CODEBOX_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("CODEBOX_DOCKER_SOCKET") {
            self.pool.docker_socket = socket;
        }
        if let Some(url) = lookup("CODEBOX_OLLAMA_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("CODEBOX_MODEL") {
            self.agent.model = model;
        }
        if let Some(raw) = lookup("CODEBOX_MAX_CONTAINERS") {
            self.pool.max_containers = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "CODEBOX_MAX_CONTAINERS",
                        value: raw,
                    })
                }
            };
        }
        if let Some(endpoint) = lookup("CODEBOX_OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }
        if let Some(raw) = lookup("CODEBOX_LOG_JSON") {
            self.telemetry.log_json = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }
}

/// A host directory exposed read-only under `/workspace/project_files`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SharedMount {
    /// Host path (bind source)
    pub source: String,
    /// Directory name below `/workspace/project_files`
    pub target: String,
}

/// Configuration for the sandbox container pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Docker Engine API socket
    pub docker_socket: String,
    /// Container names are `{name_prefix}-{session_id}`
    pub name_prefix: String,
    /// Images are `{image_prefix}-env-{environment}:{image_tag}`
    pub image_prefix: String,
    pub image_tag: String,
    /// Hard ceiling on containers (warm + bound)
    pub max_containers: usize,
    /// How long `acquire` waits for capacity before failing
    pub acquire_timeout_secs: u64,
    /// Environments to keep pre-warmed containers for
    pub warm_environments: Vec<String>,
    /// Warm containers kept per environment
    pub warm_per_environment: usize,
    /// Limits applied at provisioning time
    pub limits: ResourceLimits,
    /// Bound containers idle longer than this are reclaimed
    pub idle_timeout_secs: u64,
    /// Unknown containers older than this are removed by the sweep
    pub orphan_max_age_secs: u64,
    pub sweep_interval_secs: u64,
    pub network_mode: String,
    /// Keep each session's output directory in a named volume
    pub workspace_volumes: bool,
    pub project_files: Vec<SharedMount>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            name_prefix: "codebox-sandbox".to_string(),
            image_prefix: "codebox".to_string(),
            image_tag: "latest".to_string(),
            max_containers: 5,
            acquire_timeout_secs: 30,
            warm_environments: Vec::new(),
            warm_per_environment: 1,
            limits: ResourceLimits::default(),
            idle_timeout_secs: 30 * 60,
            orphan_max_age_secs: 10 * 60,
            sweep_interval_secs: 60,
            network_mode: "bridge".to_string(),
            workspace_volumes: true,
            project_files: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn container_name(&self, session_id: &str) -> String {
        format!("{}-{}", self.name_prefix, session_id)
    }

    pub fn image_for(&self, environment: &str) -> String {
        format!("{}-env-{}:{}", self.image_prefix, environment, self.image_tag)
    }

    pub fn workspace_volume(&self, session_id: &str) -> String {
        format!("{}-workspace-{}", self.name_prefix, session_id)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn orphan_max_age(&self) -> Duration {
        Duration::from_secs(self.orphan_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Thresholds for the loop detector
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoopDetectionConfig {
    /// Number of recent steps considered
    pub window: usize,
    /// Occurrences of one error signature that count as a loop
    pub identical_error_threshold: usize,
    /// Consecutive strictly alternating steps that count as a loop
    pub alternation_threshold: usize,
    /// Characters of the error message that feed the signature
    pub signature_prefix_chars: usize,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            window: 10,
            identical_error_threshold: 3,
            alternation_threshold: 6,
            signature_prefix_chars: 100,
        }
    }
}

/// Configuration for the agent executor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model to request from the provider (e.g., "qwen3")
    pub model: String,
    /// Iteration ceiling; reaching it aborts the run
    pub max_iterations: usize,
    /// Default per-tool timeout in seconds
    pub tool_timeout_secs: u64,
    /// Upper bound for timeouts requested through tool arguments
    pub max_tool_timeout_secs: u64,
    /// Wall-clock bound for a whole run
    pub run_timeout_secs: u64,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Retries for retryable provider failures before any output was seen
    pub provider_retries: u32,
    pub provider_retry_delay_ms: u64,
    pub loop_detection: LoopDetectionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "qwen3".to_string(),
            max_iterations: 30,
            tool_timeout_secs: 30,
            max_tool_timeout_secs: 300,
            run_timeout_secs: 30 * 60,
            system_prompt: None,
            provider_retries: 2,
            provider_retry_delay_ms: 500,
            loop_detection: LoopDetectionConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn max_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.max_tool_timeout_secs.max(self.tool_timeout_secs))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn provider_retry_delay(&self) -> Duration {
        Duration::from_millis(self.provider_retry_delay_ms)
    }
}

/// Configuration for the streaming layer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Cadence at which buffered chunk text is flushed
    pub flush_interval_ms: u64,
    /// Events retained for replay on re-attachment
    pub replay_tail: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 30,
            replay_tail: 1000,
        }
    }
}

impl StreamConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the Ollama server
    pub base_url: String,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            temperature: 0.0,
        }
    }
}

/// Logging and trace export
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP collector endpoint; trace export is off when unset
    pub otlp_endpoint: Option<String>,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "codebox".to_string(),
            otlp_endpoint: None,
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.pool.max_containers, 5);
        assert_eq!(config.agent.max_iterations, 30);
        assert_eq!(config.agent.loop_detection.identical_error_threshold, 3);
        assert_eq!(config.agent.loop_detection.alternation_threshold, 6);
        assert_eq!(config.streaming.flush_interval(), Duration::from_millis(30));
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn test_naming_conventions() {
        let pool = PoolConfig::default();
        assert_eq!(pool.container_name("abc"), "codebox-sandbox-abc");
        assert_eq!(pool.image_for("python3.13"), "codebox-env-python3.13:latest");
        assert_eq!(pool.workspace_volume("abc"), "codebox-sandbox-workspace-abc");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [pool]
            max_containers = 8
            warm_environments = ["python3.13", "node20"]

            [pool.limits]
            cpu_cores = 2.0

            [agent]
            model = "codellama"

            [agent.loop_detection]
            alternation_threshold = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_containers, 8);
        assert_eq!(config.pool.warm_environments.len(), 2);
        assert_eq!(config.pool.limits.cpu_cores, 2.0);
        assert_eq!(config.pool.limits.pids_limit, ResourceLimits::default().pids_limit);
        assert_eq!(config.pool.name_prefix, "codebox-sandbox");
        assert_eq!(config.agent.model, "codellama");
        assert_eq!(config.agent.loop_detection.alternation_threshold, 8);
        assert_eq!(config.agent.loop_detection.window, 10);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CODEBOX_MODEL", "llama3.2"),
            ("CODEBOX_MAX_CONTAINERS", "12"),
            ("CODEBOX_OTLP_ENDPOINT", "http://collector:4317"),
            ("CODEBOX_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.agent.model, "llama3.2");
        assert_eq!(config.pool.max_containers, 12);
        assert_eq!(config.telemetry.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert!(config.telemetry.log_json);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|key| (key == "CODEBOX_MAX_CONTAINERS").then(|| "zero".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "CODEBOX_MAX_CONTAINERS", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[streaming]\nflush_interval_ms = 50\n").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.streaming.flush_interval_ms, 50);
        assert_eq!(config.streaming.replay_tail, 1000);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/codebox.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
