use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Export of every live record in one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub generation: String,
    pub app_version: String,
    pub exported_at: String,
    pub collections: BTreeMap<String, Vec<Value>>,
}

impl BackupSnapshot {
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Suggested download file name, e.g. `hearth-backup-hearth-gen-3.json`.
    pub fn file_name(&self) -> String {
        format!("hearth-backup-{}.json", self.generation)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), serde_json::Error> {
        serde_json::to_writer_pretty(writer, self)
    }
}
