//! Output module for checkpoint status and exported artifacts
//!
//! This module handles:
//! - Summarizing checkpoints per tenant (`--status`)
//! - Writing flat CSV tables from checkpoint payloads
//! - Writing a markdown summary next to the tables

mod csv;
mod export;
mod markdown;
pub mod stats;

pub use export::{export_tenant, ExportSummary};
pub use markdown::{format_summary, write_summary};
pub use stats::{load_status, print_status, PhaseStatus, TenantStatus};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
