//! Complot crawler: resumable multi-phase crawls of municipal building-permit portals
//!
//! Many municipalities share one HTTP+HTML backend. This crate walks each
//! tenant through an ordered pipeline (street discovery, record search, building
//! details, request enrichment, export), checkpointing every phase so that a
//! multi-hour crawl can be interrupted and resumed without redoing work.

pub mod config;
pub mod crawler;
pub mod models;
pub mod output;
pub mod parser;
pub mod state;
pub mod storage;
pub mod tenant;

use thiserror::Error;

/// Main error type for structural (non per-item) failures
#[derive(Debug, Error)]
pub enum ComplotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tenant '{tenant}' is misconfigured: {message}")]
    TenantConfig { tenant: String, message: String },

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Backend unreachable at {url}: {detail}")]
    BackendUnreachable { url: String, detail: String },

    #[error("Invalid endpoint URL {url}: {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        from: state::PhaseState,
        to: state::PhaseState,
    },

    #[error("Cannot start worker {worker_id}: {source}")]
    WorkerSpawn {
        worker_id: usize,
        source: std::io::Error,
    },

    #[error("No worker could be started: {0}")]
    NoWorkers(String),

    #[error("Worker protocol error: {0}")]
    WorkerProtocol(String),

    #[error("Phase {phase} aborted for tenant '{tenant}': {source}; the last checkpoint is still valid for resume")]
    PhaseAborted {
        tenant: String,
        phase: state::Phase,
        source: Box<ComplotError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, ComplotError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlReport, Orchestrator, RunOptions};
pub use state::{FetchResult, Phase, PhaseState, WorkItem};
pub use tenant::Tenant;
