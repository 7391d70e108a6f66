//! JSON-file state store.
//!
//! Persists per-table sync state, schema mappings, and in-flight progress
//! checkpoints under a configured state directory:
//!
//! ```text
//! <root>/state/<table>.json      SyncState
//! <root>/mappings/<table>.json   SchemaMapping
//! <root>/progress/<table>.json   ProgressCheckpoint
//! ```
//!
//! Writes are atomic and durable: serialize to a temp sibling, fsync the
//! file, rename over the target, fsync the directory. Readers therefore
//! see either the prior record or the new one, never a torn file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use tidemark_types::{ColumnSpec, MappingDiff, ProgressCheckpoint, SchemaMapping, SyncState};

use crate::error::{Result, StateError};

const STATE_DIR: &str = "state";
const MAPPINGS_DIR: &str = "mappings";
const PROGRESS_DIR: &str = "progress";

/// File-backed store for sync state, mappings, and checkpoints.
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Open a store rooted at `root`, creating the layout if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directories cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in [STATE_DIR, MAPPINGS_DIR, PROGRESS_DIR] {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    /// Root directory of this store (also hosts the sync lock file).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, dir: &str, table: &str) -> PathBuf {
        self.root.join(dir).join(format!("{table}.json"))
    }

    /// Load the sync state for a table; `None` when never synced.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] if the file exists but cannot be
    /// decoded.
    pub fn load_state(&self, table: &str) -> Result<Option<SyncState>> {
        read_json(&self.record_path(STATE_DIR, table))
    }

    /// Persist the sync state for a table (atomic, durable).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Encode`] on failure.
    pub fn save_state(&self, table: &str, state: &SyncState) -> Result<()> {
        write_json_atomic(&self.record_path(STATE_DIR, table), state)
    }

    /// Load the stored schema mapping for a table.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] if the file exists but cannot be
    /// decoded.
    pub fn load_mapping(&self, table: &str) -> Result<Option<SchemaMapping>> {
        read_json(&self.record_path(MAPPINGS_DIR, table))
    }

    /// Store the mapping for `columns`, bumping the version iff the column
    /// set or any mapped type differs from what is stored.
    ///
    /// Returns the mapping now in force together with how it compared to
    /// the previously stored one.
    ///
    /// # Errors
    ///
    /// Propagates read/write failures; a corrupt existing mapping is fatal.
    pub fn upsert_mapping(
        &self,
        table: &str,
        columns: Vec<ColumnSpec>,
    ) -> Result<(SchemaMapping, MappingDiff)> {
        let path = self.record_path(MAPPINGS_DIR, table);
        match read_json::<SchemaMapping>(&path)? {
            Some(stored) => {
                let diff = stored.diff(&columns);
                if diff == MappingDiff::Identical {
                    return Ok((stored, diff));
                }
                let next = stored.bumped(columns);
                write_json_atomic(&path, &next)?;
                tracing::info!(table, version = next.version, "schema mapping version bumped");
                Ok((next, diff))
            }
            None => {
                let initial = SchemaMapping::initial(columns);
                write_json_atomic(&path, &initial)?;
                Ok((initial, MappingDiff::ColumnsChanged))
            }
        }
    }

    /// Replace the mapping outright at version 1 (full-sync re-derivation).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Encode`] on failure.
    pub fn reset_mapping(&self, table: &str, columns: Vec<ColumnSpec>) -> Result<SchemaMapping> {
        let initial = SchemaMapping::initial(columns);
        write_json_atomic(&self.record_path(MAPPINGS_DIR, table), &initial)?;
        Ok(initial)
    }

    /// Persist the in-flight checkpoint for its target table.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] or [`StateError::Encode`] on failure.
    pub fn write_checkpoint(&self, checkpoint: &ProgressCheckpoint) -> Result<()> {
        write_json_atomic(
            &self.record_path(PROGRESS_DIR, &checkpoint.target_table),
            checkpoint,
        )
    }

    /// Load the surviving checkpoint for a table, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] if the file exists but cannot be
    /// decoded.
    pub fn load_checkpoint(&self, table: &str) -> Result<Option<ProgressCheckpoint>> {
        read_json(&self.record_path(PROGRESS_DIR, table))
    }

    /// Remove the checkpoint for a table; absent is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] on removal failure other than not-found.
    pub fn clear_checkpoint(&self, table: &str) -> Result<()> {
        match fs::remove_file(self.record_path(PROGRESS_DIR, table)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StateError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_vec_pretty(value).map_err(StateError::Encode)?;
    payload.push(b'\n');

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    // Durable rename: fsync the containing directory.
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_types::{RunId, SyncStatus, TargetType};

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn col(name: &str, target: TargetType) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            source_type: "NUMBER(10,0)".into(),
            target_type: target,
            nullable: true,
            is_primary_key: false,
            is_temporal: false,
        }
    }

    #[test]
    fn missing_state_reads_as_none() {
        let (_dir, store) = store();
        assert!(store.load_state("events").unwrap().is_none());
        assert!(store.load_mapping("events").unwrap().is_none());
        assert!(store.load_checkpoint("events").unwrap().is_none());
    }

    #[test]
    fn state_roundtrip() {
        let (_dir, store) = store();
        let state = SyncState {
            last_watermark: Some("2026-01-15T10:00:00Z".into()),
            total_rows: 25_000,
            status: SyncStatus::Idle,
            ..SyncState::default()
        };
        store.save_state("events", &state).unwrap();
        assert_eq!(store.load_state("events").unwrap().unwrap(), state);
    }

    #[test]
    fn written_files_end_with_newline() {
        let (dir, store) = store();
        store.save_state("events", &SyncState::default()).unwrap();
        let raw = fs::read_to_string(dir.path().join("state/events.json")).unwrap();
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn no_temp_sibling_survives_a_write() {
        let (dir, store) = store();
        store.save_state("events", &SyncState::default()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("state"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn corrupt_state_is_fatal() {
        let (dir, store) = store();
        fs::write(dir.path().join("state/events.json"), "{not json").unwrap();
        let err = store.load_state("events").unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn mapping_upsert_starts_at_version_one() {
        let (_dir, store) = store();
        let (mapping, _) = store
            .upsert_mapping("events", vec![col("id", TargetType::Integer)])
            .unwrap();
        assert_eq!(mapping.version, 1);
    }

    #[test]
    fn identical_mapping_does_not_bump() {
        let (_dir, store) = store();
        let columns = vec![col("id", TargetType::Integer)];
        store.upsert_mapping("events", columns.clone()).unwrap();
        let (mapping, diff) = store.upsert_mapping("events", columns).unwrap();
        assert_eq!(mapping.version, 1);
        assert_eq!(diff, MappingDiff::Identical);
    }

    #[test]
    fn type_change_bumps_version() {
        let (_dir, store) = store();
        store
            .upsert_mapping("events", vec![col("v", TargetType::Integer)])
            .unwrap();
        let (mapping, diff) = store
            .upsert_mapping("events", vec![col("v", TargetType::VarChar)])
            .unwrap();
        assert_eq!(mapping.version, 2);
        assert_eq!(diff, MappingDiff::TypesChanged);
    }

    #[test]
    fn reset_mapping_returns_to_version_one() {
        let (_dir, store) = store();
        store
            .upsert_mapping("events", vec![col("v", TargetType::Integer)])
            .unwrap();
        store
            .upsert_mapping("events", vec![col("v", TargetType::VarChar)])
            .unwrap();
        let mapping = store
            .reset_mapping("events", vec![col("v", TargetType::Double)])
            .unwrap();
        assert_eq!(mapping.version, 1);
    }

    #[test]
    fn checkpoint_lifecycle() {
        let (_dir, store) = store();
        let mut cp = ProgressCheckpoint::begin(RunId::new(), "events", Some(100));
        cp.advance(50, Some("2026-01-15T10:00:00Z".into()));
        store.write_checkpoint(&cp).unwrap();

        let loaded = store.load_checkpoint("events").unwrap().unwrap();
        assert_eq!(loaded, cp);

        store.clear_checkpoint("events").unwrap();
        assert!(store.load_checkpoint("events").unwrap().is_none());
        // Clearing again is fine.
        store.clear_checkpoint("events").unwrap();
    }
}
