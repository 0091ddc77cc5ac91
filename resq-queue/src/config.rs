use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use resq_core::DEFAULT_MAX_RETRIES;
use serde::Deserialize;

use crate::processor::{DEFAULT_BACKGROUND_TASK_NAME, ProcessorConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retry ceiling for events enqueued without one
    pub max_retries: u32,
    /// Seconds between foreground flush passes
    pub flush_interval_secs: u64,
    /// Hours completed events are kept
    pub retention_hours: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            flush_interval_secs: 30,
            retention_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkConfig {
    /// TCP connect probe against a well-known endpoint
    Probe {
        addr: String,
        interval_secs: u64,
        timeout_ms: u64,
    },
    AlwaysOnline,
    /// Starts offline, driven through `PUT /network`
    Manual,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub task_name: String,
    /// Minimum seconds between background runs
    pub min_interval_secs: u64,
    /// Seconds a background run may take before it is abandoned
    pub budget_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            task_name: DEFAULT_BACKGROUND_TASK_NAME.to_owned(),
            min_interval_secs: 15 * 60,
            budget_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the dispatch API, including the version prefix
    pub base_url: String,
    pub token: Option<String>,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            flush_interval: Duration::from_secs(self.queue.flush_interval_secs),
            retention: Duration::from_secs(self.queue.retention_hours * 60 * 60),
            background_task_name: self.background.task_name.clone(),
            max_retries: self.queue.max_retries,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            server: ServerConfig {
                http_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            },
            storage: StorageConfig::Memory,
            network: NetworkConfig::Probe {
                addr: "1.1.1.1:443".to_owned(),
                interval_secs: 10,
                timeout_ms: 3000,
            },
            background: BackgroundConfig::default(),
            api: ApiConfig {
                base_url: "http://127.0.0.1:8080/api/v4".to_owned(),
                token: None,
                timeout_secs: default_api_timeout_secs(),
            },
        }
    }
}
