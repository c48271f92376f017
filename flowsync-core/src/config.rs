use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::scheduler::PollPolicy;
use crate::transport::{ApiClientConfig, RetryPolicy};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FlowsyncConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub polling: PollPolicy,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub mock: MockConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "ws://127.0.0.1:8000/ws/workflows".to_string(),
        }
    }
}

/// Settings for the in-memory mock backend.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MockConfig {
    pub host: String,
    pub port: u16,
    /// Reads of a non-terminal workflow before it advances one phase.
    pub steps_per_phase: u32,
    /// Return 503 for every N-th request; 0 disables fault injection.
    pub flaky_every: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            steps_per_phase: 2,
            flaky_every: 0,
        }
    }
}

impl FlowsyncConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            tracing::debug!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn client_config(&self) -> ApiClientConfig {
        ApiClientConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
            retry: self.retry.clone(),
        }
    }
}
