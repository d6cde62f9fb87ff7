//! Configuration management for render-guard.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::ratelimit::{LimiterSettings, PolicyTable, DEFAULT_SWEEP_EVERY};

/// Prefix for environment overrides, e.g. `RENDER_GUARD__LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "RENDER_GUARD";

/// Main configuration for render-guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// YAML policy file merged over the built-in table
    #[serde(default)]
    pub policies_path: Option<String>,

    /// Sweep after this many admission checks (0 disables)
    #[serde(default = "default_sweep_every")]
    pub sweep_every_requests: u64,

    /// Also sweep on a background timer with this period in seconds
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Minimum gap between violation warnings for one caller, in seconds
    #[serde(default = "default_suppression_secs")]
    pub violation_suppression_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policies_path: None,
            sweep_every_requests: default_sweep_every(),
            sweep_interval_secs: None,
            violation_suppression_secs: default_suppression_secs(),
        }
    }
}

fn default_sweep_every() -> u64 {
    DEFAULT_SWEEP_EVERY
}

fn default_suppression_secs() -> u64 {
    3600
}

impl RateLimitingConfig {
    /// Limiter settings derived from this configuration.
    pub fn limiter_settings(&self) -> LimiterSettings {
        LimiterSettings {
            sweep_every: self.sweep_every_requests,
            violation_suppression: Duration::from_secs(self.violation_suppression_secs),
        }
    }

    /// Background sweep period, if enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// The built-in policies with the configured file merged on top.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        let table = PolicyTable::builtin();
        match &self.policies_path {
            Some(path) => Ok(table.merged(PolicyTable::from_file(path)?)),
            None => Ok(table),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&contents)
            .map_err(|e| GuardError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from an optional file layered under
    /// `RENDER_GUARD__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(true));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
