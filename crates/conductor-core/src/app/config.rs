//! RuntimeConfig - process-wide settings, loaded once and shared behind `Arc`
//!
//! Layers, later wins:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `CONDUCTOR__*` environment variables (`CONDUCTOR__JOB_REQUEST__RETRIES=5`)

use std::path::Path;
use std::time::Duration;

use config::{Config, File};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::state::RetryLimit;
use crate::observability::LogFormat;
use crate::ports::control_plane::RequestPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Test,
    #[default]
    Production,
}

impl Environment {
    /// Task failures surface immediately instead of being retried.
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

/// Retry count and fixed wait of one class of control-plane calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSettings {
    pub retries: u32,
    pub retry_wait_ms: u64,
}

impl RequestSettings {
    pub fn policy(&self) -> RequestPolicy {
        RequestPolicy::new(self.retries, Duration::from_millis(self.retry_wait_ms))
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_wait_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub environment: Environment,
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    /// Fetches, cancellation checks, locks and callbacks.
    pub default_request: RequestSettings,
    /// Task status notifications.
    pub task_request: RequestSettings,
    /// Job status notifications and task registration.
    pub job_request: RequestSettings,
    pub heartbeat_interval_ms: u64,
    /// Budget of job types that set none, `-1` for unlimited.
    pub default_job_retries: RetryLimit,
    /// Swap in the disabled control plane in development and test.
    pub disable_requests_in_dev_and_test: bool,
    pub worker_concurrency: usize,
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            api_base_url: "http://localhost:8080/api/".to_string(),
            request_timeout_ms: 10_000,
            default_request: RequestSettings::default(),
            task_request: RequestSettings::default(),
            job_request: RequestSettings {
                retries: 5,
                retry_wait_ms: 2_000,
            },
            heartbeat_interval_ms: 30_000,
            default_job_retries: RetryLimit::Limited(3),
            disable_requests_in_dev_and_test: false,
            worker_concurrency: 4,
            log_format: LogFormat::Text,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&RuntimeConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: RuntimeConfig = builder
            .add_source(
                config::Environment::with_prefix("CONDUCTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.requests_disabled() {
            let url = Url::parse(&self.api_base_url).map_err(|e| ConfigError::Invalid {
                key: "api_base_url",
                message: e.to_string(),
            })?;
            if url.cannot_be_a_base() {
                return Err(ConfigError::Invalid {
                    key: "api_base_url",
                    message: format!("{url} cannot be a base URL"),
                });
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "heartbeat_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "worker_concurrency",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn requests_disabled(&self) -> bool {
        self.disable_requests_in_dev_and_test
            && matches!(self.environment, Environment::Development | Environment::Test)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
