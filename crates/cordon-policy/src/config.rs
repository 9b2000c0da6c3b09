//! YAML configuration loader for the Cordon engine.
//!
//! Every tunable the orchestrator exposes — stage timeout, retry budget,
//! approval expiry, routing threshold — is surfaced here with documented
//! defaults, so a deployment can reconfigure the engine without touching
//! the state machine.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use cordon_core::{OrchestratorConfig, RetryConfig, Severity, SeverityRouting};

/// Environment variable pointing at the configuration file.
pub const CONFIG_PATH_ENV: &str = "CORDON_CONFIG";

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[error("failed to parse YAML configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value was parsed but is out of range or unrecognized.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Stage invocation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient failures.
    pub retry: RetrySection,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry: RetrySection::default(),
        }
    }
}

/// Retry tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Maximum invocation attempts per stage entry.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Approval gate tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Bound on the approval wait, in seconds. Absent means decisions are
    /// awaited indefinitely.
    pub expiry_secs: Option<u64>,
}

/// Routing tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// Lowest severity gated behind human approval.
    pub approval_threshold: String,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            approval_threshold: "high".to_string(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stage invocation settings.
    pub stages: StagesConfig,
    /// Approval gate settings.
    pub approval: ApprovalSection,
    /// Routing settings.
    pub routing: RoutingSection,
}

impl EngineConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Loads the file named by `CORDON_CONFIG`, or the defaults if the
    /// variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_path(path),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Builds the orchestrator configuration, validating ranges.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        if self.stages.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "stages.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.stages.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "stages.retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.stages.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "stages.timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(OrchestratorConfig {
            stage_timeout: Duration::from_secs(self.stages.timeout_secs),
            retry: RetryConfig {
                max_attempts: self.stages.retry.max_attempts,
                base_delay: Duration::from_millis(self.stages.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.stages.retry.max_delay_ms),
                backoff_multiplier: self.stages.retry.backoff_multiplier,
                jitter: self.stages.retry.jitter,
            },
            approval_expiry: self.approval.expiry_secs.map(Duration::from_secs),
            ..OrchestratorConfig::default()
        })
    }

    /// Builds the routing policy from the configured threshold.
    pub fn routing_policy(&self) -> Result<SeverityRouting, ConfigError> {
        Ok(SeverityRouting {
            approval_threshold: parse_severity(&self.routing.approval_threshold)?,
        })
    }
}

/// Parses a severity name.
fn parse_severity(s: &str) -> Result<Severity, ConfigError> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        other => Err(ConfigError::InvalidValue(format!(
            "unknown severity: {:?}",
            other
        ))),
    }
}
