use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contents of `_CURRENT`: the snapshot readers should use.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SnapshotManifest {
    pub snapshot_id: String,
    pub committed_at: DateTime<Utc>,
    pub tables: BTreeMap<String, TableEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Parquet file relative to the warehouse root.
    pub file: String,
    pub row_count: usize,
    pub columns: Vec<String>,
}

impl SnapshotManifest {
    pub fn table(&self, name: &str) -> Option<&TableEntry> {
        self.tables.get(name)
    }

    pub fn missing_tables<'a>(&self, expected: &[&'a str]) -> Vec<&'a str> {
        expected
            .iter()
            .copied()
            .filter(|name| !self.tables.contains_key(*name))
            .collect()
    }
}
