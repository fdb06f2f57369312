//! SpecWeaver configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::LlmError;
use crate::orchestrator::Phase;

/// Main SpecWeaver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Generation call behaviour
    pub generation: GenerationConfig,

    /// Task admission limits
    pub concurrency: ConcurrencyConfig,

    /// Phase progression policy
    pub workflow: WorkflowConfig,

    /// Result cache configuration
    pub cache: CacheConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Event bus configuration
    pub events: EventsConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the API key environment variable is set. Only commands that
    /// contact the backend call this.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        if self.concurrency.max_tasks == 0 {
            return Err(eyre::eyre!("concurrency.max-tasks must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .specweaver.yml
        let local_config = PathBuf::from(".specweaver.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/specweaver/specweaver.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("specweaver").join("specweaver.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialised
    ///
    /// Errors are swallowed: a broken config file is reported later by `load`.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".specweaver.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("specweaver").join("specweaver.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String, LlmError> {
        std::env::var(&self.api_key_env).map_err(|_| LlmError::MissingApiKey(self.api_key_env.clone()))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            temperature: 0.2,
            timeout_ms: 300_000,
        }
    }
}

/// Generation call behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Stream responses through the decoder (false = one blocking call)
    pub streaming: bool,

    /// Per-task deadline in milliseconds; zero or negative disables it
    #[serde(rename = "task-timeout-ms")]
    pub task_timeout_ms: i64,

    /// Attempts per operation, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,
}

impl GenerationConfig {
    /// Task deadline, or None when disabled
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_ms > 0).then(|| Duration::from_millis(self.task_timeout_ms as u64))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            task_timeout_ms: 180_000,
            max_attempts: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// What to do with a task request beyond the in-progress limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait in FIFO order for a free slot
    #[default]
    Queue,
    /// Fail immediately with Throttled
    Reject,
}

/// Task admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum simultaneously in-progress tasks
    #[serde(rename = "max-tasks")]
    pub max_tasks: usize,

    /// Overflow behaviour
    pub overflow: OverflowPolicy,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_tasks: 4,
            overflow: OverflowPolicy::Queue,
        }
    }
}

/// Phase progression policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Start the next phase automatically when one completes
    #[serde(rename = "auto-progress")]
    pub auto_progress: bool,

    /// Phases exempt from the busy check
    #[serde(rename = "concurrent-phases")]
    pub concurrent_phases: Vec<Phase>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_progress: true,
            concurrent_phases: Vec::new(),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for façade snapshots
    pub dir: PathBuf,

    /// Autosave interval in milliseconds
    #[serde(rename = "autosave-interval-ms")]
    pub autosave_interval_ms: u64,
}

impl StorageConfig {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms.max(1))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/specweaver on Linux)
        let dir = dirs::data_dir()
            .map(|d| d.join("specweaver"))
            .unwrap_or_else(|| PathBuf::from(".specweaver"));

        Self {
            dir,
            autosave_interval_ms: 5000,
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Directory for JSONL event logs; no logger when unset
    #[serde(rename = "log-dir", skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Broadcast channel capacity
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            channel_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.concurrency.max_tasks, 4);
        assert_eq!(config.concurrency.overflow, OverflowPolicy::Queue);
        assert!(config.workflow.auto_progress);
        assert!(config.generation.streaming);
        assert_eq!(config.generation.max_attempts, 2);
        assert!(config.cache.capacity.is_none());
    }

    #[test]
    fn test_llm_config_defaults() {
        let config = LlmConfig::default();

        assert_eq!(config.provider, "anthropic");
        assert!(config.model.contains("sonnet"));
        assert_eq!(config.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

llm:
  provider: openai
  model: gpt-4o
  api-key-env: MY_API_KEY
  base-url: https://api.example.com
  max-tokens: 8192
  temperature: 0.7
  timeout-ms: 60000

generation:
  streaming: false
  task-timeout-ms: 0
  max-attempts: 3

concurrency:
  max-tasks: 2
  overflow: reject

workflow:
  auto-progress: false
  concurrent-phases: [design]

cache:
  capacity: 128
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.llm.max_tokens, 8192);
        assert!(!config.generation.streaming);
        assert_eq!(config.generation.task_timeout(), None);
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.concurrency.max_tasks, 2);
        assert_eq!(config.concurrency.overflow, OverflowPolicy::Reject);
        assert!(!config.workflow.auto_progress);
        assert_eq!(config.workflow.concurrent_phases, vec![Phase::Design]);
        assert_eq!(config.cache.capacity, Some(128));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  model: claude-haiku
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.llm.model, "claude-haiku");

        // Defaults for unspecified
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.concurrency.max_tasks, 4);
        assert_eq!(config.generation.task_timeout(), Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yml");
        fs::write(&path, "log-level: warn\nconcurrency:\n  max-tasks: 9\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.concurrency.max_tasks, 9);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_explicit_path_missing_is_error() {
        let path = PathBuf::from("/nonexistent/specweaver.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_validate_missing_api_key() {
        let mut config = Config::default();
        config.llm.api_key_env = "SPECWEAVER_TEST_KEY_THAT_IS_NOT_SET".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SPECWEAVER_TEST_KEY_THAT_IS_NOT_SET"));
    }

    #[test]
    fn test_config_roundtrips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("max-tasks"));
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.concurrency.max_tasks, config.concurrency.max_tasks);
    }
}
