//! Checkpoint store trait and error types

use crate::state::Phase;
use crate::storage::{Checkpoint, CheckpointData};
use chrono::{DateTime, Duration, DurationRound, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable (tenant, phase) checkpoint persistence
///
/// Only the orchestrator writes checkpoints. Workers never hold a store.
pub trait CheckpointStore: Send {
    // ===== Writes =====

    /// Atomically replaces the checkpoint for `(tenant, phase)`
    ///
    /// A reader never observes a half-written record. Returns the `saved_at`
    /// marker written, which is strictly greater than any earlier marker for
    /// the same key.
    fn save(
        &mut self,
        tenant: &str,
        phase: Phase,
        data: &CheckpointData,
        complete: bool,
    ) -> StorageResult<DateTime<Utc>>;

    // ===== Reads =====

    /// Loads a checkpoint
    ///
    /// Absent, unreadable and corrupt records all yield `None`. Corruption is
    /// logged, never raised.
    fn load(&self, tenant: &str, phase: Phase) -> Option<Checkpoint>;

    fn exists_and_complete(&self, tenant: &str, phase: Phase) -> bool {
        self.load(tenant, phase).map(|c| c.complete).unwrap_or(false)
    }
}

/// Next `saved_at` marker after `previous`
///
/// Wall-clock time truncated to milliseconds, the precision every backend
/// stores. Bumped one millisecond past `previous` when the clock has not
/// advanced (or went backwards).
pub fn next_saved_at(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    let now = now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now);
    match previous {
        Some(prev) if prev >= now => prev + Duration::milliseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_saved_at_is_strictly_increasing() {
        let future = Utc::now() + Duration::hours(1);
        let next = next_saved_at(Some(future));
        assert_eq!(next, future + Duration::milliseconds(1));

        let past = Utc::now() - Duration::hours(1);
        assert!(next_saved_at(Some(past)) > past);
        assert!(next_saved_at(None) <= Utc::now());
    }

    #[test]
    fn test_next_saved_at_has_millisecond_precision() {
        let mut previous = None;
        for _ in 0..50 {
            let next = next_saved_at(previous);
            assert_eq!(next.timestamp_subsec_nanos() % 1_000_000, 0);
            if let Some(prev) = previous {
                assert!(next > prev);
            }
            previous = Some(next);
        }
    }
}
