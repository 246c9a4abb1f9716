//! GenerationStore: the validating view of one store generation.
//!
//! Every write is checked against the catalog schema before it reaches the
//! engine, and every committed write is announced as a [`ChangeEvent`]
//! synchronously, after the write returns from the engine.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::reactive::{ChangeEvent, Notifier, Unsubscribe};
use crate::schema::{Catalog, CollectionSchema};
use crate::types::{now_iso, record_id, BatchResult, RecordError, ID_FIELD, UPDATED_AT_FIELD};

use super::traits::{RecordSource, StorageEngine, StorageResult};

pub struct GenerationStore {
    engine: Arc<dyn StorageEngine>,
    name: String,
    catalog: Arc<Catalog>,
    notifier: Arc<Notifier<ChangeEvent>>,
}

impl GenerationStore {
    /// Open an existing generation for validated access.
    ///
    /// Fails with `GenerationNotFound` when the generation does not exist and
    /// with `SchemaMismatch` / `CollectionNotRegistered` when its recorded
    /// schema versions differ from the catalog.
    pub fn open(
        engine: Arc<dyn StorageEngine>,
        name: &str,
        catalog: Arc<Catalog>,
    ) -> StorageResult<Self> {
        let info = engine
            .generation_info(name)?
            .ok_or_else(|| StorageError::GenerationNotFound(name.to_string()))?;

        for schema in catalog.iter() {
            match info.collections.get(&schema.name) {
                None => {
                    return Err(StorageError::CollectionNotRegistered {
                        generation: name.to_string(),
                        collection: schema.name.clone(),
                    })
                }
                Some(&stored) if stored != schema.version => {
                    return Err(StorageError::SchemaMismatch {
                        generation: name.to_string(),
                        collection: schema.name.clone(),
                        stored,
                        expected: schema.version,
                    })
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            engine,
            name: name.to_string(),
            catalog,
            notifier: Arc::new(Notifier::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn schema(&self, collection: &str) -> StorageResult<&Arc<CollectionSchema>> {
        self.catalog
            .get(collection)
            .ok_or_else(|| StorageError::CollectionNotRegistered {
                generation: self.name.clone(),
                collection: collection.to_string(),
            })
    }

    fn check(&self, schema: &CollectionSchema, record: &Value) -> StorageResult<String> {
        let id = record_id(record)
            .ok_or_else(|| StorageError::MissingId {
                collection: schema.name.clone(),
            })?
            .to_string();
        schema.validate(record).map_err(|source| StorageError::Invalid {
            collection: schema.name.clone(),
            id: id.clone(),
            source,
        })?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        self.schema(collection)?;
        Ok(self
            .engine
            .raw_get(&self.name, collection, id)?
            .filter(|r| !r.deleted)
            .map(|r| r.data))
    }

    /// Every live record of a collection, ordered by id.
    pub fn list(&self, collection: &str) -> StorageResult<Vec<Value>> {
        self.schema(collection)?;
        let scan = self.engine.raw_scan(&self.name, collection)?;
        if let Some(first) = scan.errors.first() {
            return Err(StorageError::Corruption {
                generation: self.name.clone(),
                collection: collection.to_string(),
                id: first.id.clone(),
                message: first.error.clone(),
            });
        }
        Ok(scan
            .records
            .into_iter()
            .filter(|r| !r.deleted)
            .map(|r| r.data)
            .collect())
    }

    pub fn count(&self, collection: &str) -> StorageResult<usize> {
        self.schema(collection)?;
        Ok(self.engine.raw_scan(&self.name, collection)?.live().count())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace a record by id.
    pub fn put(&self, collection: &str, record: Value) -> StorageResult<Value> {
        let schema = self.schema(collection)?;
        let id = self.check(schema, &record)?;
        self.engine
            .put_records(&self.name, collection, &[(id.clone(), record.clone())])?;
        self.notifier.notify(&ChangeEvent::Put {
            collection: collection.to_string(),
            id,
            data: record.clone(),
        });
        Ok(record)
    }

    /// Validate and write many records in one engine batch. Invalid records
    /// are reported in `errors` and skipped; the rest are written together.
    pub fn put_many(&self, collection: &str, records: Vec<Value>) -> StorageResult<BatchResult> {
        let schema = self.schema(collection)?;
        let mut result = BatchResult::default();
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            match self.check(schema, &record) {
                Ok(id) => rows.push((id, record)),
                Err(e) => result.errors.push(RecordError {
                    id: record_id(&record).unwrap_or_default().to_string(),
                    collection: collection.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        if !rows.is_empty() {
            self.engine.put_records(&self.name, collection, &rows)?;
            result.written = rows.into_iter().map(|(id, _)| id).collect();
            self.notifier.notify(&ChangeEvent::Bulk {
                collection: collection.to_string(),
                ids: result.written.clone(),
            });
        }
        Ok(result)
    }

    /// Merge `fields` into an existing record. `updatedAt` is bumped to now
    /// unless `fields` sets it; `id` cannot be changed.
    pub fn patch(&self, collection: &str, id: &str, fields: Value) -> StorageResult<Value> {
        let existing = self
            .get(collection, id)?
            .ok_or_else(|| StorageError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let mut merged: Map<String, Value> = match existing {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        merged.insert(UPDATED_AT_FIELD.to_string(), Value::String(now_iso()));
        if let Value::Object(updates) = fields {
            for (key, value) in updates {
                if key != ID_FIELD {
                    merged.insert(key, value);
                }
            }
        }
        merged.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        self.put(collection, Value::Object(merged))
    }

    /// Remove a record. Returns whether a live record existed.
    pub fn remove(&self, collection: &str, id: &str) -> StorageResult<bool> {
        self.schema(collection)?;
        let removed = self.engine.remove_record(&self.name, collection, id)?;
        if removed {
            self.notifier.notify(&ChangeEvent::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Observe committed changes to one collection.
    pub fn subscribe(
        &self,
        collection: &str,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let collection = collection.to_string();
        self.notifier.subscribe(move |event: &ChangeEvent| {
            if event.collection() == collection {
                callback(event);
            }
        })
    }

    /// Observe committed changes to every collection.
    pub fn on_change(
        &self,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.notifier.subscribe(callback)
    }
}

impl RecordSource for GenerationStore {
    fn read_all(&self, collection: &str) -> StorageResult<Vec<Value>> {
        self.list(collection)
    }
}

impl std::fmt::Debug for GenerationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationStore")
            .field("name", &self.name)
            .field("collections", &self.catalog.names())
            .finish()
    }
}
