//! Work items and the tagged results produced for them

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One atomic unit of fetch work within a phase
///
/// `input` is opaque to the executor and the pool. Only the phase handler
/// that created the item interprets it. An item is pending until a
/// `FetchResult` exists for its id; the result's outcome is its terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            input,
            attempt_count: 0,
        }
    }
}

/// Failure classification carried in a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // ===== Retryable =====
    Timeout,
    Connection,
    ServerError,
    Throttled,
    GarbledResponse,

    // ===== Permanent =====
    NotFound,
    AccessDenied,
    BadRequest,
    ParseError,

    // ===== Infrastructure =====
    /// The worker process owning the item died before reporting it
    WorkerLost,
    /// The phase handler panicked while processing the item
    HandlerPanic,
}

impl ErrorCategory {
    /// Returns true if a fetch failing this way is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Connection
                | Self::ServerError
                | Self::Throttled
                | Self::GarbledResponse
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::ServerError => "server_error",
            Self::Throttled => "throttled",
            Self::GarbledResponse => "garbled_response",
            Self::NotFound => "not_found",
            Self::AccessDenied => "access_denied",
            Self::BadRequest => "bad_request",
            Self::ParseError => "parse_error",
            Self::WorkerLost => "worker_lost",
            Self::HandlerPanic => "handler_panic",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail recorded for a failed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub category: ErrorCategory,
    pub detail: String,
}

impl FetchFailure {
    pub fn new(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.detail)
    }
}

/// Outcome discriminant of a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: Value },
    RetryableError { error: FetchFailure },
    PermanentError { error: FetchFailure },
}

/// The final, immutable result for one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    #[serde(rename = "id")]
    pub item_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub attempt_count: u32,
}

impl FetchResult {
    pub fn success(item_id: impl Into<String>, payload: Value, attempt_count: u32) -> Self {
        Self {
            item_id: item_id.into(),
            outcome: Outcome::Success { payload },
            attempt_count,
        }
    }

    /// Builds a failed result, choosing the variant from the category
    pub fn failed(item_id: impl Into<String>, error: FetchFailure, attempt_count: u32) -> Self {
        let outcome = if error.category.is_retryable() {
            Outcome::RetryableError { error }
        } else {
            Outcome::PermanentError { error }
        };
        Self {
            item_id: item_id.into(),
            outcome,
            attempt_count,
        }
    }

    /// Synthesized failure for an item whose worker died before answering
    pub fn worker_lost(item: &WorkItem, worker_id: usize, detail: &str) -> Self {
        Self {
            item_id: item.id.clone(),
            outcome: Outcome::PermanentError {
                error: FetchFailure::new(
                    ErrorCategory::WorkerLost,
                    format!("worker {}: {}", worker_id, detail),
                ),
            },
            attempt_count: item.attempt_count,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { payload } => Some(payload),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::RetryableError { error } | Outcome::PermanentError { error } => Some(error),
        }
    }
}
