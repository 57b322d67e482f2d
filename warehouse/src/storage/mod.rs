//! Persisted star schema.
//!
//! Every load writes its tables into a fresh `snapshots/<id>/` directory and
//! publishes them together by renaming a new manifest over `_CURRENT`. Readers
//! only follow `_CURRENT`, so they see either the previous load or the new one.

pub mod manifest;
pub mod registry;

pub use manifest::{SnapshotManifest, TableEntry};
pub use registry::{SnapshotTableRegistry, TableRegistry, register_star_schema};

use crate::utils::paths::{MANIFEST_FILE, PathBuilder, is_valid_table_name};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use common::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Warehouse {
    paths: PathBuilder,
}

impl Warehouse {
    /// Opens (creating if needed) the warehouse directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = PathBuilder::new(root);
        fs::create_dir_all(paths.snapshots_dir()).map_err(|e| {
            Error::Storage(format!(
                "cannot create warehouse at {}: {}",
                paths.root().display(),
                e
            ))
        })?;
        Ok(Self { paths })
    }

    /// Opens `root` for reading only; nothing is created. A missing directory
    /// surfaces as `SchemaMissing` from [`require_manifest`](Self::require_manifest).
    pub fn open_read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathBuilder::new(root),
        }
    }

    pub fn paths(&self) -> &PathBuilder {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// The committed manifest, or `None` before the first successful load.
    pub fn current_manifest(&self) -> Result<Option<SnapshotManifest>> {
        let path = self.paths.manifest_path();
        match fs::read(&path) {
            Ok(bytes) => {
                let manifest = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Storage(format!("corrupt manifest {}: {}", path.display(), e))
                })?;
                Ok(Some(manifest))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn require_manifest(&self) -> Result<SnapshotManifest> {
        self.current_manifest()?.ok_or_else(|| {
            Error::SchemaMissing(format!(
                "no committed snapshot in {}; run a load first",
                self.root().display()
            ))
        })
    }

    /// Starts a full-refresh load into a new, unpublished snapshot.
    pub fn begin_load(&self) -> Result<LoadTransaction<'_>> {
        let current = self.current_manifest()?;
        self.prune(current.as_ref().map(|m| m.snapshot_id.as_str()));

        let snapshot_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.paths.snapshot_dir(&snapshot_id))?;
        debug!(snapshot_id = %snapshot_id, "Staging snapshot");

        Ok(LoadTransaction {
            warehouse: self,
            snapshot_id,
            tables: BTreeMap::new(),
            committed: false,
        })
    }

    /// Removes every snapshot directory and stale manifest temp file except `keep`.
    /// Failures are logged and skipped.
    fn prune(&self, keep: Option<&str>) {
        match fs::read_dir(self.paths.snapshots_dir()) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if Some(name.as_str()) == keep {
                        continue;
                    }
                    match fs::remove_dir_all(entry.path()) {
                        Ok(()) => debug!(snapshot_id = %name, "Removed old snapshot"),
                        Err(e) => warn!(snapshot_id = %name, error = %e, "Failed to remove old snapshot"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list snapshots"),
        }

        if let Ok(entries) = fs::read_dir(self.root()) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(MANIFEST_FILE) && name.ends_with(".tmp") {
                    if let Err(e) = fs::remove_file(entry.path()) {
                        warn!(file = %name, error = %e, "Failed to remove stale manifest");
                    }
                }
            }
        }
    }
}

/// A load in progress. Tables are staged with [`replace_table`](Self::replace_table)
/// and become visible only on [`commit`](Self::commit); dropping the
/// transaction uncommitted discards the staged snapshot.
pub struct LoadTransaction<'a> {
    warehouse: &'a Warehouse,
    snapshot_id: String,
    tables: BTreeMap<String, TableEntry>,
    committed: bool,
}

impl LoadTransaction<'_> {
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    /// Writes `batch` as the full contents of `table_name` in this snapshot.
    pub fn replace_table(&mut self, table_name: &str, batch: &RecordBatch) -> Result<()> {
        if !is_valid_table_name(table_name) {
            return Err(Error::InvalidInput(format!(
                "invalid table name '{}'",
                table_name
            )));
        }

        let paths = self.warehouse.paths();
        let relative = paths.relative_table_file(&self.snapshot_id, table_name);
        let path = paths.resolve(&relative);

        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![
                KeyValue {
                    key: "table_name".to_string(),
                    value: Some(table_name.to_string()),
                },
                KeyValue {
                    key: "snapshot_id".to_string(),
                    value: Some(self.snapshot_id.clone()),
                },
            ]))
            .build();

        let file = File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        if batch.num_rows() > 0 {
            writer.write(batch)?;
        }
        writer.close()?;

        let columns = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        self.tables.insert(
            table_name.to_string(),
            TableEntry {
                file: relative,
                row_count: batch.num_rows(),
                columns,
            },
        );

        debug!(
            table = table_name,
            rows = batch.num_rows(),
            snapshot_id = %self.snapshot_id,
            "Table staged"
        );
        Ok(())
    }

    /// Publishes the staged tables as the current snapshot.
    pub fn commit(mut self) -> Result<SnapshotManifest> {
        if self.tables.is_empty() {
            return Err(Error::Storage("nothing staged to commit".into()));
        }

        let manifest = SnapshotManifest {
            snapshot_id: self.snapshot_id.clone(),
            committed_at: Utc::now(),
            tables: std::mem::take(&mut self.tables),
        };

        let paths = self.warehouse.paths();
        let temp_path = paths.manifest_temp_path(&self.snapshot_id);
        if let Err(e) = write_synced(&temp_path, &serde_json::to_vec_pretty(&manifest)?)
            .and_then(|_| fs::rename(&temp_path, paths.manifest_path()))
        {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::Storage(format!(
                "failed to publish snapshot {}: {}",
                self.snapshot_id, e
            )));
        }
        self.committed = true;

        info!(
            snapshot_id = %manifest.snapshot_id,
            tables = manifest.tables.len(),
            "Snapshot committed"
        );
        self.warehouse.prune(Some(manifest.snapshot_id.as_str()));
        Ok(manifest)
    }
}

impl Drop for LoadTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let dir = self.warehouse.paths().snapshot_dir(&self.snapshot_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => warn!(snapshot_id = %self.snapshot_id, "Discarded uncommitted snapshot"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                snapshot_id = %self.snapshot_id,
                error = %e,
                "Failed to discard uncommitted snapshot"
            ),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch(names: &[&str]) -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("branch_id", DataType::Int64, false),
                Field::new("branch", DataType::Utf8, false),
            ])),
            vec![
                Arc::new(Int64Array::from_iter_values(1..=names.len() as i64)),
                Arc::new(StringArray::from_iter_values(names.iter().copied())),
            ],
        )
        .unwrap()
    }

    fn snapshot_dirs(warehouse: &Warehouse) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(warehouse.paths().snapshots_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_no_manifest_before_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();
        assert!(warehouse.current_manifest().unwrap().is_none());
        assert!(matches!(
            warehouse.require_manifest(),
            Err(Error::SchemaMissing(_))
        ));
    }

    #[test]
    fn test_read_only_open_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        let warehouse = Warehouse::open_read_only(&root);

        assert!(matches!(
            warehouse.require_manifest(),
            Err(Error::SchemaMissing(_))
        ));
        assert!(!root.exists());
    }

    #[test]
    fn test_commit_publishes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();

        let mut load = warehouse.begin_load().unwrap();
        load.replace_table("branch_dim", &batch(&["Alex", "Giza"]))
            .unwrap();
        let id = load.snapshot_id().to_string();
        let manifest = load.commit().unwrap();

        assert_eq!(manifest.snapshot_id, id);
        let entry = manifest.table("branch_dim").unwrap();
        assert_eq!(entry.row_count, 2);
        assert_eq!(entry.columns, vec!["branch_id", "branch"]);
        assert!(warehouse.paths().resolve(&entry.file).exists());
        assert_eq!(warehouse.current_manifest().unwrap(), Some(manifest));
    }

    #[test]
    fn test_dropped_load_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();

        let mut first = warehouse.begin_load().unwrap();
        first.replace_table("branch_dim", &batch(&["Alex"])).unwrap();
        let committed = first.commit().unwrap();

        {
            let mut second = warehouse.begin_load().unwrap();
            second
                .replace_table("branch_dim", &batch(&["Alex", "Giza", "Cairo"]))
                .unwrap();
            // dropped without commit
        }

        assert_eq!(warehouse.current_manifest().unwrap(), Some(committed.clone()));
        assert_eq!(snapshot_dirs(&warehouse), vec![committed.snapshot_id]);
    }

    #[test]
    fn test_commit_prunes_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();

        for names in [&["Alex"][..], &["Alex", "Giza"][..]] {
            let mut load = warehouse.begin_load().unwrap();
            load.replace_table("branch_dim", &batch(names)).unwrap();
            load.commit().unwrap();
        }

        let current = warehouse.require_manifest().unwrap();
        assert_eq!(current.table("branch_dim").unwrap().row_count, 2);
        assert_eq!(snapshot_dirs(&warehouse), vec![current.snapshot_id]);
    }

    #[test]
    fn test_commit_contains_only_staged_tables() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();

        let mut first = warehouse.begin_load().unwrap();
        first.replace_table("branch_dim", &batch(&["Alex"])).unwrap();
        first.replace_table("product_dim", &batch(&["Food"])).unwrap();
        first.commit().unwrap();

        let mut second = warehouse.begin_load().unwrap();
        second.replace_table("branch_dim", &batch(&["Giza"])).unwrap();
        let manifest = second.commit().unwrap();

        assert!(manifest.table("product_dim").is_none());
    }

    #[test]
    fn test_invalid_table_name_and_empty_commit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();

        let mut load = warehouse.begin_load().unwrap();
        assert!(matches!(
            load.replace_table("../escape", &batch(&["Alex"])),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(load.commit(), Err(Error::Storage(_))));
        assert!(warehouse.current_manifest().unwrap().is_none());
    }

    #[test]
    fn test_empty_table_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open(dir.path()).unwrap();

        let mut load = warehouse.begin_load().unwrap();
        load.replace_table("branch_dim", &batch(&[])).unwrap();
        let manifest = load.commit().unwrap();

        let entry = manifest.table("branch_dim").unwrap();
        assert_eq!(entry.row_count, 0);
        assert!(warehouse.paths().resolve(&entry.file).exists());
    }
}
