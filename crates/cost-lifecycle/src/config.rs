//! Configuration for the lifecycle engine.
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! - `COST_LIFECYCLE_HORIZON_HOURS`: hours until a cancellation is expected to complete
//! - `COST_LIFECYCLE_STATE_PATH`: path of the cancellation state file
//! - `COST_LIFECYCLE_ENDPOINT`: base URL of the cancellation API
//!
//! ```toml
//! horizon_hours = 24
//! state_path = ".cost-lifecycle/cancellations.json"
//!
//! [transport]
//! endpoint = "http://localhost:5000"
//! timeout_secs = 30
//!
//! [policy]
//! pay_as_you_go = ["Amazon Rekognition"]
//! required = ["Tax"]
//!
//! [policy.parents]
//! "Amazon Bedrock" = ["Claude 3.5 Sonnet"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::policy::{OverridePolicy, PolicyConfig};

/// Environment variable overriding the cancellation horizon.
pub const ENV_HORIZON_HOURS: &str = "COST_LIFECYCLE_HORIZON_HOURS";

/// Environment variable overriding the state file path.
pub const ENV_STATE_PATH: &str = "COST_LIFECYCLE_STATE_PATH";

/// Environment variable overriding the transport endpoint.
pub const ENV_ENDPOINT: &str = "COST_LIFECYCLE_ENDPOINT";

const DEFAULT_HORIZON_HOURS: u32 = 24;
/// Longest accepted horizon (one year).
pub const MAX_HORIZON_HOURS: u32 = 8760;
const DEFAULT_STATE_PATH: &str = ".cost-lifecycle/cancellations.json";
const DEFAULT_ENDPOINT: &str = "http://localhost:5000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Hours from request until a cancellation is expected to complete.
    pub horizon_hours: u32,
    /// Path of the cancellation state file.
    pub state_path: PathBuf,
    /// Cancellation API settings.
    pub transport: TransportConfig,
    /// Override rules; the AWS defaults apply when absent.
    pub policy: Option<PolicyConfig>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            horizon_hours: DEFAULT_HORIZON_HOURS,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            transport: TransportConfig::default(),
            policy: None,
        }
    }
}

/// Cancellation API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL of the cancellation API.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TransportConfig {
    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs)
    }
}

impl LifecycleConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    /// Load from `path` if given, else defaults, then apply environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_HORIZON_HOURS) {
            self.horizon_hours = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{ENV_HORIZON_HOURS} must be a whole number, got '{value}'"
                ))
            })?;
        }
        if let Some(value) = lookup(ENV_STATE_PATH) {
            self.state_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_ENDPOINT) {
            self.transport.endpoint = value;
        }
        self.validate()
    }

    /// Check values are in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_hours == 0 {
            return Err(ConfigError::Invalid(
                "horizon_hours must be greater than zero".to_string(),
            ));
        }
        if self.horizon_hours > MAX_HORIZON_HOURS {
            return Err(ConfigError::Invalid(format!(
                "horizon_hours must be at most {MAX_HORIZON_HOURS}, got {}",
                self.horizon_hours
            )));
        }
        if self.transport.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "transport.endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Cancellation horizon.
    #[must_use]
    pub fn horizon(&self) -> Duration {
        Duration::hours(i64::from(self.horizon_hours))
    }

    /// Build the override policy.
    pub fn policy(&self) -> Result<OverridePolicy, ConfigError> {
        match &self.policy {
            Some(policy) => Ok(policy.build()?),
            None => Ok(OverridePolicy::aws_defaults()),
        }
    }
}
