//! JSON-file checkpoint backend
//!
//! Layout: `{dir}/{tenant}/{phase}.json`. A save writes `{phase}.json.tmp`,
//! syncs it to disk and renames it over the final path. The last marker
//! written per key is remembered, so only the first save of a key reads the
//! existing file.

use crate::state::Phase;
use crate::storage::traits::{next_saved_at, CheckpointStore, StorageResult};
use crate::storage::{Checkpoint, CheckpointData};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct JsonCheckpointStore {
    dir: PathBuf,
    last_saved: HashMap<(String, Phase), DateTime<Utc>>,
}

impl JsonCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            last_saved: HashMap::new(),
        })
    }

    fn path_for(&self, tenant: &str, phase: Phase) -> PathBuf {
        self.dir
            .join(tenant)
            .join(format!("{}.json", phase.to_db_string()))
    }

    fn read_file(path: &Path) -> StorageResult<Option<Checkpoint>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn save(
        &mut self,
        tenant: &str,
        phase: Phase,
        data: &CheckpointData,
        complete: bool,
    ) -> StorageResult<DateTime<Utc>> {
        let final_path = self.path_for(tenant, phase);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let key = (tenant.to_string(), phase);
        let previous = match self.last_saved.get(&key) {
            Some(saved_at) => Some(*saved_at),
            None => Self::read_file(&final_path)
                .ok()
                .flatten()
                .map(|c| c.saved_at),
        };
        let saved_at = next_saved_at(previous);

        let checkpoint = Checkpoint {
            tenant: tenant.to_string(),
            phase,
            complete,
            saved_at,
            items: data.items.clone(),
            metadata: data.metadata.clone(),
        };

        let temp_path = final_path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &checkpoint)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;

        self.last_saved.insert(key, saved_at);
        Ok(saved_at)
    }

    fn load(&self, tenant: &str, phase: Phase) -> Option<Checkpoint> {
        let path = self.path_for(tenant, phase);
        match Self::read_file(&path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Checkpoint is unreadable, treating it as absent"
                );
                None
            }
        }
    }
}
