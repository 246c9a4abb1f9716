//! Legacy store reader.
//!
//! Reads prior generations through the raw engine only. The validating open
//! path would refuse exactly the generations migration needs to read, because
//! their recorded schema versions no longer match the catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::storage::{RawGeneration, RecordSource, StorageEngine, StorageResult};
use crate::types::{record_id, RawRecord};

#[derive(Clone)]
pub struct LegacyReader {
    engine: Arc<dyn StorageEngine>,
}

impl LegacyReader {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Generations that hold `collection`, oldest first, never including
    /// `exclude` (the migration target).
    pub fn list_candidate_generations(
        &self,
        collection: &str,
        exclude: Option<&str>,
    ) -> StorageResult<Vec<String>> {
        let mut infos: Vec<_> = self
            .engine
            .list_generations()?
            .into_iter()
            .filter(|info| info.collections.contains_key(collection))
            .filter(|info| Some(info.name.as_str()) != exclude)
            .collect();
        infos.sort_by(|a, b| a.version_order().cmp(&b.version_order()));
        Ok(infos.into_iter().map(|info| info.name).collect())
    }

    /// Every live record of `collection` in `generation`, untyped.
    ///
    /// Never fails: a generation that cannot be read contributes nothing.
    pub fn read_all(&self, generation: &str, collection: &str) -> Vec<Value> {
        match RawGeneration::new(self.engine.as_ref(), generation).read_all(collection) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    generation = %generation,
                    collection = %collection,
                    error = %e,
                    "legacy generation unreadable, skipping"
                );
                Vec::new()
            }
        }
    }

    /// Union of `collection` across `generations` (oldest first). When an id
    /// appears in several generations the later generation wins outright, and
    /// a tombstone in a later generation removes the id entirely.
    /// Records without a usable id are kept so the transform can reject them.
    pub fn read_merged(&self, collection: &str, generations: &[String]) -> Vec<Value> {
        let mut by_id: BTreeMap<String, Value> = BTreeMap::new();
        let mut unkeyed = Vec::new();

        for generation in generations {
            for row in self.scan(generation, collection) {
                if row.deleted {
                    if let Some(id) = record_id(&row.data) {
                        by_id.remove(id);
                    }
                    by_id.remove(&row.id);
                    continue;
                }
                match record_id(&row.data) {
                    Some(id) => {
                        by_id.insert(id.to_string(), row.data);
                    }
                    None => unkeyed.push(row.data),
                }
            }
        }

        by_id.into_values().chain(unkeyed).collect()
    }

    /// Every row of `collection` in `generation`, tombstones included.
    fn scan(&self, generation: &str, collection: &str) -> Vec<RawRecord> {
        match self.engine.raw_scan(generation, collection) {
            Ok(scan) => {
                if !scan.errors.is_empty() {
                    tracing::warn!(
                        generation = %generation,
                        collection = %collection,
                        undecodable = scan.errors.len(),
                        "skipping rows that could not be decoded"
                    );
                }
                scan.records
            }
            Err(e) => {
                tracing::warn!(
                    generation = %generation,
                    collection = %collection,
                    error = %e,
                    "legacy generation unreadable, skipping"
                );
                Vec::new()
            }
        }
    }
}
