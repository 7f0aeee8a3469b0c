//! SQLite checkpoint backend

use crate::state::Phase;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{next_saved_at, CheckpointStore, StorageError, StorageResult};
use crate::storage::{Checkpoint, CheckpointData};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite storage backend
///
/// Each save replaces one row inside a transaction, so a reader sees either
/// the previous record or the new one.
pub struct SqliteCheckpointStore {
    conn: Connection,
}

impl SqliteCheckpointStore {
    /// Opens or creates the checkpoint database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn read_row(&self, tenant: &str, phase: Phase) -> StorageResult<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                "SELECT complete, saved_at, items, metadata FROM checkpoints
                 WHERE tenant = ?1 AND phase = ?2",
                params![tenant, phase.to_db_string()],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((complete, saved_at, items, metadata)) = row else {
            return Ok(None);
        };

        let saved_at = parse_timestamp(&saved_at)?;
        Ok(Some(Checkpoint {
            tenant: tenant.to_string(),
            phase,
            complete,
            saved_at,
            items: serde_json::from_str(&items)?,
            metadata: serde_json::from_str(&metadata)?,
        }))
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("bad saved_at '{}': {}", s, e)))
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(
        &mut self,
        tenant: &str,
        phase: Phase,
        data: &CheckpointData,
        complete: bool,
    ) -> StorageResult<DateTime<Utc>> {
        let items = serde_json::to_string(&data.items)?;
        let metadata = serde_json::to_string(&data.metadata)?;
        let failed = data.items.iter().filter(|r| !r.is_success()).count();

        let tx = self.conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT saved_at FROM checkpoints WHERE tenant = ?1 AND phase = ?2",
                params![tenant, phase.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;
        let previous = previous.and_then(|s| parse_timestamp(&s).ok());
        let saved_at = next_saved_at(previous);

        tx.execute(
            "INSERT OR REPLACE INTO checkpoints
             (tenant, phase, complete, saved_at, items, metadata, item_count, failed_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tenant,
                phase.to_db_string(),
                complete,
                format_timestamp(saved_at),
                items,
                metadata,
                data.items.len() as i64,
                failed as i64,
            ],
        )?;

        tx.commit()?;
        Ok(saved_at)
    }

    fn load(&self, tenant: &str, phase: Phase) -> Option<Checkpoint> {
        match self.read_row(tenant, phase) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(
                    tenant = tenant,
                    phase = %phase,
                    error = %e,
                    "Checkpoint is unreadable, treating it as absent"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ErrorCategory, FetchFailure, FetchResult};
    use serde_json::json;

    fn data() -> CheckpointData {
        CheckpointData::new(vec![
            FetchResult::success("12", json!({"code": 12, "name": "הרצל"}), 1),
            FetchResult::failed(
                "13",
                FetchFailure::new(ErrorCategory::Timeout, "timed out"),
                4,
            ),
        ])
        .with_metadata("baseline", json!([{"code": 12, "name": "הרצל"}]))
    }

    #[test]
    fn test_save_and_load() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        assert!(store.load("ofaqim", Phase::StreetDiscovery).is_none());

        let saved_at = store
            .save("ofaqim", Phase::StreetDiscovery, &data(), false)
            .unwrap();
        let cp = store.load("ofaqim", Phase::StreetDiscovery).unwrap();

        assert!(!cp.complete);
        assert_eq!(cp.items, data().items);
        assert_eq!(cp.metadata, data().metadata);
        assert_eq!(format_timestamp(cp.saved_at), format_timestamp(saved_at));
        assert!(!store.exists_and_complete("ofaqim", Phase::StreetDiscovery));
    }

    #[test]
    fn test_save_overwrites_and_advances_saved_at() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        let first = store
            .save("ofaqim", Phase::RecordSearch, &data(), false)
            .unwrap();
        let second = store
            .save("ofaqim", Phase::RecordSearch, &CheckpointData::default(), true)
            .unwrap();

        assert!(second > first);
        let cp = store.load("ofaqim", Phase::RecordSearch).unwrap();
        assert!(cp.complete);
        assert!(cp.items.is_empty());
        assert!(store.exists_and_complete("ofaqim", Phase::RecordSearch));
    }

    #[test]
    fn test_back_to_back_saves_store_increasing_markers() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut previous = None;
        for _ in 0..200 {
            let returned = store
                .save("ofaqim", Phase::StreetDiscovery, &CheckpointData::default(), false)
                .unwrap();
            let stored = store.load("ofaqim", Phase::StreetDiscovery).unwrap().saved_at;
            assert_eq!(stored, returned);
            if let Some(prev) = previous {
                assert!(stored > prev, "{} not after {}", stored, prev);
            }
            previous = Some(stored);
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        store
            .save("ofaqim", Phase::DetailFetch, &data(), true)
            .unwrap();

        assert!(store.load("batyam", Phase::DetailFetch).is_none());
        assert!(store.load("ofaqim", Phase::RecordSearch).is_none());
        assert!(store.exists_and_complete("ofaqim", Phase::DetailFetch));
    }

    #[test]
    fn test_corrupt_row_loads_as_none() {
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO checkpoints (tenant, phase, complete, saved_at, items, metadata)
                 VALUES ('ofaqim', 'record_search', 1, '2024-01-01T00:00:00.000Z', '{not json', '{}')",
                [],
            )
            .unwrap();

        assert!(store.load("ofaqim", Phase::RecordSearch).is_none());
        assert!(!store.exists_and_complete("ofaqim", Phase::RecordSearch));
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        {
            let mut store = SqliteCheckpointStore::new(&path).unwrap();
            store
                .save("ofaqim", Phase::StreetDiscovery, &data(), true)
                .unwrap();
        }
        let store = SqliteCheckpointStore::new(&path).unwrap();
        assert!(store.exists_and_complete("ofaqim", Phase::StreetDiscovery));
    }
}
