//! Checkpoint persistence
//!
//! One addressable record per `(tenant, phase)`, holding the phase's output
//! collection so far, a `complete` marker, a strictly increasing `saved_at`
//! and phase-specific metadata. Two backends share the [`CheckpointStore`]
//! contract: a SQLite database and a directory of JSON files.

mod json_file;
mod schema;
mod sqlite;
mod traits;

pub use json_file::JsonCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use traits::{next_saved_at, CheckpointStore, StorageError, StorageResult};

use crate::config::{CheckpointBackend, OutputConfig};
use crate::state::{FetchResult, Phase};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Opens the checkpoint store selected by the output configuration
///
/// # Arguments
///
/// * `output` - Output section of the configuration
///
/// # Returns
///
/// * `Ok(Box<dyn CheckpointStore>)` - Store ready for reads and writes
/// * `Err(StorageError)` - The database or directory could not be opened
pub fn open_store(output: &OutputConfig) -> StorageResult<Box<dyn CheckpointStore>> {
    std::fs::create_dir_all(&output.data_dir)?;
    match output.checkpoint_backend {
        CheckpointBackend::Sqlite => Ok(Box::new(SqliteCheckpointStore::new(
            &output.database_path(),
        )?)),
        CheckpointBackend::Json => Ok(Box::new(JsonCheckpointStore::new(
            output.checkpoint_dir(),
        )?)),
    }
}

/// The content written by a save: results plus phase metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    #[serde(default)]
    pub items: Vec<FetchResult>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl CheckpointData {
    pub fn new(items: Vec<FetchResult>) -> Self {
        Self {
            items,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// A loaded checkpoint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tenant: String,
    pub phase: Phase,
    pub complete: bool,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<FetchResult>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Checkpoint {
    pub fn item_ids(&self) -> HashSet<&str> {
        self.items.iter().map(|r| r.item_id.as_str()).collect()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.item_id.as_str())
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.len() - self.success_count()
    }

    /// Success payloads in item order
    pub fn payloads(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().filter_map(FetchResult::payload)
    }

    /// Success payloads decoded as `T`
    pub fn decode_payloads<T: DeserializeOwned>(&self) -> Vec<T> {
        decode_payloads(&self.items)
    }

    pub fn into_data(self) -> CheckpointData {
        CheckpointData {
            items: self.items,
            metadata: self.metadata,
        }
    }
}

/// Decodes the success payloads of `items`, skipping (and logging) any that
/// do not match `T`
pub fn decode_payloads<'a, T, I>(items: I) -> Vec<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = &'a FetchResult>,
{
    items
        .into_iter()
        .filter_map(|result| {
            let payload = result.payload()?;
            match serde_json::from_value(payload.clone()) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(item = %result.item_id, error = %e, "Payload has an unexpected shape");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ErrorCategory, FetchFailure};
    use serde_json::json;

    fn checkpoint() -> Checkpoint {
        Checkpoint {
            tenant: "ofaqim".to_string(),
            phase: Phase::DetailFetch,
            complete: true,
            saved_at: Utc::now(),
            items: vec![
                FetchResult::success("1", json!({"tik": "1"}), 1),
                FetchResult::failed("2", FetchFailure::new(ErrorCategory::NotFound, "404"), 1),
                FetchResult::success("3", json!({"tik": "3"}), 2),
            ],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_checkpoint_counts() {
        let cp = checkpoint();
        assert_eq!(cp.success_count(), 2);
        assert_eq!(cp.failed_count(), 1);
        assert_eq!(cp.failed_ids(), vec!["2"]);
        assert!(cp.item_ids().contains("3"));
        assert_eq!(cp.payloads().count(), 2);

        #[derive(Deserialize)]
        struct Tik {
            tik: String,
        }
        let tiks: Vec<Tik> = cp.decode_payloads();
        assert_eq!(tiks.len(), 2);
        assert_eq!(tiks[1].tik, "3");
        assert!(cp.decode_payloads::<u32>().is_empty());
    }

    #[test]
    fn test_open_store_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig {
            data_dir: dir.path().join("data").display().to_string(),
            checkpoint_backend: CheckpointBackend::Json,
            ..OutputConfig::default()
        };
        let store = open_store(&output).unwrap();
        assert!(store.load("ofaqim", Phase::StreetDiscovery).is_none());
        assert!(output.checkpoint_dir().is_dir());
    }
}
