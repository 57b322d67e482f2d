use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "_CURRENT";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Layout of a warehouse directory:
/// `<root>/_CURRENT` and `<root>/snapshots/<snapshot_id>/<table>.parquet`.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    root: PathBuf,
}

impl PathBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn manifest_temp_path(&self, snapshot_id: &str) -> PathBuf {
        self.root.join(format!("{}.{}.tmp", MANIFEST_FILE, snapshot_id))
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    pub fn snapshot_dir(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir().join(snapshot_id)
    }

    /// Table file path relative to the root, as recorded in the manifest.
    pub fn relative_table_file(&self, snapshot_id: &str, table_name: &str) -> String {
        format!("{}/{}/{}.parquet", SNAPSHOTS_DIR, snapshot_id, table_name)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Table names become file names, so only `[A-Za-z0-9_]` is allowed.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
