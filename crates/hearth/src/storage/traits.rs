//! Storage access traits.
//!
//! Two separate interfaces share the minimal [`RecordSource`]
//! read contract:
//!
//! - [`StorageEngine`]: raw maintenance access used by migration, the
//!   ledger and settings. Never validates records against a schema, so it
//!   can read generations whose schema no longer matches the running app.
//! - [`GenerationStore`](super::GenerationStore): the validating interface
//!   used by ordinary code. Opening it fails when the stored schema versions
//!   differ from the catalog.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::StorageError;
use crate::types::{GenerationInfo, RawRecord, RawScan};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Read every live record of a collection.
pub trait RecordSource {
    fn read_all(&self, collection: &str) -> StorageResult<Vec<Value>>;
}

/// Persistent per-generation, per-collection object store.
///
/// Implementors must be `Send + Sync` so one engine can be shared by every
/// session of an instance. Each call is atomic; the engine's own
/// single-writer serialization is relied upon by callers.
pub trait StorageEngine: Send + Sync {
    /// Enumerate generations from metadata only.
    fn list_generations(&self) -> StorageResult<Vec<GenerationInfo>>;

    fn generation_info(&self, name: &str) -> StorageResult<Option<GenerationInfo>> {
        Ok(self
            .list_generations()?
            .into_iter()
            .find(|info| info.name == name))
    }

    /// Create a generation with the given collection → schema version map.
    ///
    /// Idempotent: creating an existing generation with identical collections
    /// returns its info. A differing collection map is a
    /// `StorageError::GenerationConflict`.
    fn create_generation(
        &self,
        name: &str,
        collections: &BTreeMap<String, u32>,
    ) -> StorageResult<GenerationInfo>;

    /// Delete a generation and every record in it. Returns whether it existed.
    fn drop_generation(&self, name: &str) -> StorageResult<bool>;

    /// Every stored row of a collection, tombstones included. Rows that fail to
    /// decode are reported in `RawScan::errors`.
    fn raw_scan(&self, generation: &str, collection: &str) -> StorageResult<RawScan>;

    fn raw_get(&self, generation: &str, collection: &str, id: &str)
        -> StorageResult<Option<RawRecord>>;

    /// Upsert records by id in one atomic batch.
    fn put_records(
        &self,
        generation: &str,
        collection: &str,
        records: &[(String, Value)],
    ) -> StorageResult<()>;

    /// Tombstone a record. Returns whether a live record was removed.
    fn remove_record(&self, generation: &str, collection: &str, id: &str) -> StorageResult<bool>;

    // -- metadata outside any generation --

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>>;

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()>;

    fn delete_meta(&self, key: &str) -> StorageResult<()>;

    /// Atomically set `key` to `value` if it is absent, returning whichever
    /// value is stored afterwards.
    fn claim_meta(&self, key: &str, value: &str) -> StorageResult<String>;
}

/// Raw, non-validating view of one generation.
pub struct RawGeneration<'a> {
    engine: &'a dyn StorageEngine,
    name: &'a str,
}

impl<'a> RawGeneration<'a> {
    pub fn new(engine: &'a dyn StorageEngine, name: &'a str) -> Self {
        Self { engine, name }
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

impl RecordSource for RawGeneration<'_> {
    fn read_all(&self, collection: &str) -> StorageResult<Vec<Value>> {
        let scan = self.engine.raw_scan(self.name, collection)?;
        if !scan.errors.is_empty() {
            tracing::warn!(
                generation = %self.name,
                collection = %collection,
                undecodable = scan.errors.len(),
                "skipping rows that could not be decoded"
            );
        }
        Ok(scan.records.into_iter().filter(|r| !r.deleted).map(|r| r.data).collect())
    }
}
