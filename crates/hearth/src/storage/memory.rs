//! MemoryEngine: a `StorageEngine` that keeps every generation in memory.
//!
//! Used by tests and by hosts that persist elsewhere. All state sits behind a
//! single `parking_lot::Mutex`, which gives the same one-writer-at-a-time
//! guarantee a real engine provides.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{now_iso, GenerationInfo, RawRecord, RawScan};

use super::traits::{StorageEngine, StorageResult};

struct MemoryGeneration {
    info: GenerationInfo,
    /// collection → (id → row)
    collections: HashMap<String, BTreeMap<String, RawRecord>>,
}

#[derive(Default)]
struct MemoryState {
    generations: BTreeMap<String, MemoryGeneration>,
    meta: HashMap<String, String>,
    failing_scans: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `raw_scan` of `generation` fail with a corruption error.
    /// Fault injection for exercising read-failure paths.
    pub fn fail_scans_for(&self, generation: &str) {
        self.state.lock().failing_scans.insert(generation.to_string());
    }

    pub fn generation_names(&self) -> Vec<String> {
        self.state.lock().generations.keys().cloned().collect()
    }
}

fn collection_mut<'a>(
    state: &'a mut MemoryState,
    generation: &str,
    collection: &str,
) -> StorageResult<&'a mut BTreeMap<String, RawRecord>> {
    let gen = state
        .generations
        .get_mut(generation)
        .ok_or_else(|| StorageError::GenerationNotFound(generation.to_string()))?;
    gen.collections
        .get_mut(collection)
        .ok_or_else(|| StorageError::CollectionNotRegistered {
            generation: generation.to_string(),
            collection: collection.to_string(),
        })
}

impl StorageEngine for MemoryEngine {
    fn list_generations(&self) -> StorageResult<Vec<GenerationInfo>> {
        Ok(self
            .state
            .lock()
            .generations
            .values()
            .map(|g| g.info.clone())
            .collect())
    }

    fn create_generation(
        &self,
        name: &str,
        collections: &BTreeMap<String, u32>,
    ) -> StorageResult<GenerationInfo> {
        let mut state = self.state.lock();
        if let Some(existing) = state.generations.get(name) {
            return match collections
                .iter()
                .find(|(c, v)| existing.info.collections.get(*c) != Some(*v))
            {
                None if existing.info.collections.len() == collections.len() => {
                    Ok(existing.info.clone())
                }
                mismatch => Err(StorageError::GenerationConflict {
                    generation: name.to_string(),
                    collection: mismatch
                        .map(|(c, _)| c.clone())
                        .unwrap_or_else(|| "<extra collections>".to_string()),
                }),
            };
        }

        let info = GenerationInfo {
            name: name.to_string(),
            collections: collections.clone(),
            created_at: now_iso(),
        };
        state.generations.insert(
            name.to_string(),
            MemoryGeneration {
                info: info.clone(),
                collections: collections
                    .keys()
                    .map(|c| (c.clone(), BTreeMap::new()))
                    .collect(),
            },
        );
        Ok(info)
    }

    fn drop_generation(&self, name: &str) -> StorageResult<bool> {
        Ok(self.state.lock().generations.remove(name).is_some())
    }

    fn raw_scan(&self, generation: &str, collection: &str) -> StorageResult<RawScan> {
        let mut state = self.state.lock();
        if state.failing_scans.contains(generation) {
            return Err(StorageError::Corruption {
                generation: generation.to_string(),
                collection: collection.to_string(),
                id: "*".to_string(),
                message: "injected scan failure".to_string(),
            });
        }
        let rows = collection_mut(&mut state, generation, collection)?;
        Ok(RawScan {
            records: rows.values().cloned().collect(),
            errors: Vec::new(),
        })
    }

    fn raw_get(
        &self,
        generation: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<Option<RawRecord>> {
        let mut state = self.state.lock();
        Ok(collection_mut(&mut state, generation, collection)?
            .get(id)
            .cloned())
    }

    fn put_records(
        &self,
        generation: &str,
        collection: &str,
        records: &[(String, Value)],
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let rows = collection_mut(&mut state, generation, collection)?;
        for (id, data) in records {
            rows.insert(
                id.clone(),
                RawRecord {
                    id: id.clone(),
                    collection: collection.to_string(),
                    data: data.clone(),
                    deleted: false,
                },
            );
        }
        Ok(())
    }

    fn remove_record(&self, generation: &str, collection: &str, id: &str) -> StorageResult<bool> {
        let mut state = self.state.lock();
        let rows = collection_mut(&mut state, generation, collection)?;
        match rows.get_mut(id) {
            Some(row) if !row.deleted => {
                row.deleted = true;
                row.data = Value::Null;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state.lock().meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.state
            .lock()
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> StorageResult<()> {
        self.state.lock().meta.remove(key);
        Ok(())
    }

    fn claim_meta(&self, key: &str, value: &str) -> StorageResult<String> {
        Ok(self
            .state
            .lock()
            .meta
            .entry(key.to_string())
            .or_insert_with(|| value.to_string())
            .clone())
    }
}
