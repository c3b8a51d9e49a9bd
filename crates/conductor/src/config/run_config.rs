use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConductorError, ConductorResult};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CONDUCTOR_";

/// Settings for a single scheduling run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of agents running at once within a level
    pub max_parallel: usize,
    /// Maximum attempts per agent (the first attempt counts)
    pub max_retries: u32,
    /// Delay before the second attempt; doubles on every further attempt
    pub backoff_base_ms: u64,
    /// Upper bound for the backoff delay
    pub max_backoff_ms: u64,
    /// Per-attempt timeout
    pub agent_timeout_secs: u64,
    /// How many times a denied file lock is re-requested before giving up
    pub lock_retry_attempts: u32,
    /// Delay between lock re-requests
    pub lock_retry_delay_ms: u64,
    /// Root of the shared output tree
    pub output_root: PathBuf,
    /// Directory for checkpoint snapshots
    pub checkpoint_dir: PathBuf,
    /// JSON-lines session event file
    pub event_log_path: PathBuf,
    /// Environment variables (credentials) that must be set before a run
    pub required_env: Vec<String>,
    /// Remove checkpoints once a run finishes with every agent completed
    pub clear_checkpoint_on_success: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_retries: 3,
            backoff_base_ms: 1000,
            max_backoff_ms: 30_000,
            agent_timeout_secs: 600,
            lock_retry_attempts: 5,
            lock_retry_delay_ms: 200,
            output_root: PathBuf::from("output"),
            checkpoint_dir: PathBuf::from(".conductor/checkpoints"),
            event_log_path: PathBuf::from(".conductor/events.jsonl"),
            required_env: Vec::new(),
            clear_checkpoint_on_success: false,
        }
    }
}

impl RunConfig {
    /// Create a config rooted at `workspace`: output, checkpoints and event
    /// log all live underneath it
    pub fn rooted_at(workspace: impl AsRef<Path>) -> Self {
        let workspace = workspace.as_ref();
        Self {
            output_root: workspace.join("output"),
            checkpoint_dir: workspace.join(".conductor").join("checkpoints"),
            event_log_path: workspace.join(".conductor").join("events.jsonl"),
            ..Default::default()
        }
    }

    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml_str(yaml: &str) -> ConductorResult<Self> {
        let config: RunConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ConductorError::Configuration(format!("invalid run config: {}", e)))?;
        Ok(config)
    }

    /// Load a YAML config file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Configuration(format!(
                "cannot read run config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Overlay `CONDUCTOR_*` variables from the process environment
    pub fn apply_env(self) -> ConductorResult<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables produced by `lookup` (keys carry the prefix)
    pub fn apply_env_from<F>(mut self, lookup: F) -> ConductorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("MAX_PARALLEL") {
            self.max_parallel = parse_env("MAX_PARALLEL", &v)?;
        }
        if let Some(v) = var("MAX_RETRIES") {
            self.max_retries = parse_env("MAX_RETRIES", &v)?;
        }
        if let Some(v) = var("BACKOFF_BASE_MS") {
            self.backoff_base_ms = parse_env("BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = var("MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse_env("MAX_BACKOFF_MS", &v)?;
        }
        if let Some(v) = var("AGENT_TIMEOUT_SECS") {
            self.agent_timeout_secs = parse_env("AGENT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("LOCK_RETRY_ATTEMPTS") {
            self.lock_retry_attempts = parse_env("LOCK_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("LOCK_RETRY_DELAY_MS") {
            self.lock_retry_delay_ms = parse_env("LOCK_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = var("CLEAR_CHECKPOINT_ON_SUCCESS") {
            self.clear_checkpoint_on_success = parse_env("CLEAR_CHECKPOINT_ON_SUCCESS", &v)?;
        }
        if let Some(v) = var("OUTPUT_ROOT") {
            self.output_root = PathBuf::from(v);
        }
        if let Some(v) = var("CHECKPOINT_DIR") {
            self.checkpoint_dir = PathBuf::from(v);
        }
        if let Some(v) = var("EVENT_LOG") {
            self.event_log_path = PathBuf::from(v);
        }
        Ok(self)
    }

    /// Check the settings and the presence of required credentials
    pub fn validate(&self) -> ConductorResult<()> {
        self.validate_with_env(|key| std::env::var(key).ok())
    }

    pub fn validate_with_env<F>(&self, lookup: F) -> ConductorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.max_parallel == 0 {
            return Err(ConductorError::Configuration(
                "max_parallel must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConductorError::Configuration(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if self.max_backoff_ms < self.backoff_base_ms {
            return Err(ConductorError::Configuration(
                "max_backoff_ms must be >= backoff_base_ms".to_string(),
            ));
        }
        if self.agent_timeout_secs == 0 {
            return Err(ConductorError::Configuration(
                "agent_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(ConductorError::Configuration(
                "output_root must be set".to_string(),
            ));
        }

        let missing: Vec<&str> = self
            .required_env
            .iter()
            .filter(|key| lookup(key).map(|v| v.trim().is_empty()).unwrap_or(true))
            .map(|key| key.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ConductorError::Configuration(format!(
                "missing required credentials: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Backoff before attempt `next_attempt` (2-based: the delay after the
    /// first failure is the base)
    pub fn backoff_for(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2).min(31);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConductorResult<T> {
    value.trim().parse().map_err(|_| {
        ConductorError::Configuration(format!(
            "{}{} has invalid value '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate_with_env(|_| None).is_ok());
    }

    #[test]
    fn test_yaml_partial_document() {
        let config = RunConfig::from_yaml_str(
            "max_parallel: 2\noutput_root: /tmp/out\nrequired_env: [API_KEY]\n",
        )
        .unwrap();
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.required_env, vec!["API_KEY".to_string()]);
    }

    #[test]
    fn test_yaml_malformed_is_configuration_error() {
        let err = RunConfig::from_yaml_str("max_parallel: [oops").unwrap_err();
        assert!(matches!(err, ConductorError::Configuration(_)));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("CONDUCTOR_MAX_PARALLEL", "8"),
            ("CONDUCTOR_OUTPUT_ROOT", "/srv/out"),
            ("CONDUCTOR_LOCK_RETRY_ATTEMPTS", "9"),
            ("CONDUCTOR_LOCK_RETRY_DELAY_MS", "50"),
            ("CONDUCTOR_CLEAR_CHECKPOINT_ON_SUCCESS", "true"),
        ]
        .into_iter()
        .collect();

        let config = RunConfig::default()
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_parallel, 8);
        assert_eq!(config.output_root, PathBuf::from("/srv/out"));
        assert_eq!(config.lock_retry_attempts, 9);
        assert_eq!(config.lock_retry_delay_ms, 50);
        assert!(config.clear_checkpoint_on_success);

        let err = RunConfig::default()
            .apply_env_from(|k| {
                (k == "CONDUCTOR_CLEAR_CHECKPOINT_ON_SUCCESS").then(|| "sometimes".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, ConductorError::Configuration(_)));

        let err = RunConfig::default()
            .apply_env_from(|k| (k == "CONDUCTOR_MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConductorError::Configuration(_)));
    }

    #[test]
    fn test_validation_failures() {
        let config = RunConfig {
            max_parallel: 0,
            ..Default::default()
        };
        assert!(config.validate_with_env(|_| None).is_err());

        let config = RunConfig {
            backoff_base_ms: 100,
            max_backoff_ms: 10,
            ..Default::default()
        };
        assert!(config.validate_with_env(|_| None).is_err());
    }

    #[test]
    fn test_missing_credentials() {
        let config = RunConfig {
            required_env: vec!["ANTHROPIC_API_KEY".to_string()],
            ..Default::default()
        };
        let err = config.validate_with_env(|_| None).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
        assert!(config
            .validate_with_env(|_| Some("sk-test".to_string()))
            .is_ok());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RunConfig {
            backoff_base_ms: 100,
            max_backoff_ms: 350,
            ..Default::default()
        };
        assert_eq!(config.backoff_for(2), Duration::from_millis(100));
        assert_eq!(config.backoff_for(3), Duration::from_millis(200));
        assert_eq!(config.backoff_for(4), Duration::from_millis(350));
        assert_eq!(config.backoff_for(40), Duration::from_millis(350));
    }
}
