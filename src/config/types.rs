use crate::crawler::RetryPolicy;
use crate::tenant::Tenant;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the crawler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Tenants added to, or overriding, the built-in catalog
    #[serde(default, rename = "tenant")]
    pub tenants: Vec<Tenant>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum in-flight fetches per process
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-call timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay (milliseconds); doubles per retry
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling (milliseconds)
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Results between intermediate checkpoints
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,

    /// Worker processes per phase; 1 runs everything in-process
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// House numbers tried, in order, when probing a street code
    #[serde(default = "default_test_house_numbers")]
    pub test_house_numbers: Vec<u32>,

    /// Record search scans house numbers `1..max-house-number`
    #[serde(default = "default_max_house_number")]
    pub max_house_number: u32,
}

fn default_max_concurrent() -> usize {
    20
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    2000
}

fn default_retry_max_delay() -> u64 {
    60_000
}

fn default_save_interval() -> usize {
    100
}

fn default_workers() -> usize {
    1
}

fn default_test_house_numbers() -> Vec<u32> {
    vec![1, 2, 3, 5, 10, 20, 50]
}

fn default_max_house_number() -> u32 {
    500
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            save_interval: default_save_interval(),
            workers: default_workers(),
            test_house_numbers: default_test_house_numbers(),
            max_house_number: default_max_house_number(),
        }
    }
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://handasi.complot.co.il/magicscripts/mgrqispi.dll".to_string()
}

fn default_app_name() -> String {
    "cixpa".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_name: default_app_name(),
            user_agent: default_user_agent(),
        }
    }
}

/// Where checkpoints live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// One SQLite database under the data directory
    Sqlite,

    /// One JSON file per (tenant, phase)
    Json,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root directory; exports land in `{data-dir}/{tenant}/`
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_backend")]
    pub checkpoint_backend: CheckpointBackend,

    /// SQLite file name inside the data directory
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_backend() -> CheckpointBackend {
    CheckpointBackend::Sqlite
}

fn default_database_name() -> String {
    "checkpoints.db".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkpoint_backend: default_backend(),
            database_name: default_database_name(),
        }
    }
}

impl OutputConfig {
    pub fn tenant_dir(&self, tenant_key: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(tenant_key)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("checkpoints")
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.database_name)
    }
}
