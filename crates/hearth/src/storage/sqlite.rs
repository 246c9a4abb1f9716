//! SQLite storage engine.
//!
//! Implements `StorageEngine` using rusqlite (bundled). The connection is
//! protected by a `parking_lot::ReentrantMutex<RefCell<Connection>>`, so a
//! multi-statement operation can hold the lock across its transaction while
//! helpers re-acquire it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::ReentrantMutex;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{now_iso, GenerationInfo, RawRecord, RawScan, RecordError};

use super::traits::{StorageEngine, StorageResult};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS generations (
        name       TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS generation_collections (
        generation     TEXT NOT NULL,
        collection     TEXT NOT NULL,
        schema_version INTEGER NOT NULL,
        PRIMARY KEY (generation, collection)
    );
    CREATE TABLE IF NOT EXISTS records (
        generation TEXT NOT NULL,
        collection TEXT NOT NULL,
        id         TEXT NOT NULL,
        data       TEXT NOT NULL DEFAULT 'null',
        deleted    INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (generation, collection, id)
    );
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );";

pub struct SqliteEngine {
    conn: ReentrantMutex<RefCell<rusqlite::Connection>>,
}

impl SqliteEngine {
    /// Open (or create) a file-backed database and ensure its tables exist.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Self::with_schema(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_schema(rusqlite::Connection::open_in_memory()?)
    }

    fn with_schema(conn: rusqlite::Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: ReentrantMutex::new(RefCell::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> StorageResult<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.borrow();
        f(&conn)
    }

    fn collections_of(
        conn: &rusqlite::Connection,
        generation: &str,
    ) -> StorageResult<BTreeMap<String, u32>> {
        let mut stmt = conn.prepare_cached(
            "SELECT collection, schema_version FROM generation_collections
             WHERE generation = ?1",
        )?;
        let rows = stmt.query_map(params![generation], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Fails unless `generation` exists and registers `collection`.
    fn ensure_collection(
        conn: &rusqlite::Connection,
        generation: &str,
        collection: &str,
    ) -> StorageResult<()> {
        let registered: Option<u32> = conn
            .query_row(
                "SELECT schema_version FROM generation_collections
                 WHERE generation = ?1 AND collection = ?2",
                params![generation, collection],
                |row| row.get(0),
            )
            .optional()?;
        if registered.is_some() {
            return Ok(());
        }
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM generations WHERE name = ?1",
                params![generation],
                |row| row.get(0),
            )
            .optional()?;
        Err(match exists {
            Some(_) => StorageError::CollectionNotRegistered {
                generation: generation.to_string(),
                collection: collection.to_string(),
            },
            None => StorageError::GenerationNotFound(generation.to_string()),
        })
    }

    fn decode_row(
        generation: &str,
        collection: &str,
        id: String,
        data: &str,
        deleted: bool,
    ) -> Result<RawRecord, RecordError> {
        match serde_json::from_str::<Value>(data) {
            Ok(data) => Ok(RawRecord {
                id,
                collection: collection.to_string(),
                data,
                deleted,
            }),
            Err(e) => {
                tracing::debug!(generation, collection, id = %id, error = %e, "undecodable row");
                Err(RecordError {
                    id,
                    collection: collection.to_string(),
                    error: e.to_string(),
                })
            }
        }
    }
}

impl StorageEngine for SqliteEngine {
    fn list_generations(&self) -> StorageResult<Vec<GenerationInfo>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT name, created_at FROM generations ORDER BY name")?;
            let heads = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            heads
                .into_iter()
                .map(|(name, created_at)| {
                    Ok(GenerationInfo {
                        collections: Self::collections_of(conn, &name)?,
                        name,
                        created_at,
                    })
                })
                .collect()
        })
    }

    fn generation_info(&self, name: &str) -> StorageResult<Option<GenerationInfo>> {
        self.with_conn(|conn| {
            let created_at: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM generations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            created_at
                .map(|created_at| {
                    Ok(GenerationInfo {
                        name: name.to_string(),
                        collections: Self::collections_of(conn, name)?,
                        created_at,
                    })
                })
                .transpose()
        })
    }

    fn create_generation(
        &self,
        name: &str,
        collections: &BTreeMap<String, u32>,
    ) -> StorageResult<GenerationInfo> {
        self.with_conn(|conn| {
            let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT created_at FROM generations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(created_at) = existing {
                let stored = Self::collections_of(&tx, name)?;
                if &stored != collections {
                    let collection = collections
                        .iter()
                        .find(|(c, v)| stored.get(*c) != Some(*v))
                        .map(|(c, _)| c.clone())
                        .unwrap_or_else(|| "<extra collections>".to_string());
                    return Err(StorageError::GenerationConflict {
                        generation: name.to_string(),
                        collection,
                    });
                }
                return Ok(GenerationInfo {
                    name: name.to_string(),
                    collections: stored,
                    created_at,
                });
            }

            let created_at = now_iso();
            tx.execute(
                "INSERT INTO generations (name, created_at) VALUES (?1, ?2)",
                params![name, created_at],
            )?;
            for (collection, version) in collections {
                tx.execute(
                    "INSERT INTO generation_collections (generation, collection, schema_version)
                     VALUES (?1, ?2, ?3)",
                    params![name, collection, version],
                )?;
            }
            tx.commit()?;
            Ok(GenerationInfo {
                name: name.to_string(),
                collections: collections.clone(),
                created_at,
            })
        })
    }

    fn drop_generation(&self, name: &str) -> StorageResult<bool> {
        self.with_conn(|conn| {
            let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM records WHERE generation = ?1", params![name])?;
            tx.execute(
                "DELETE FROM generation_collections WHERE generation = ?1",
                params![name],
            )?;
            let removed = tx.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    fn raw_scan(&self, generation: &str, collection: &str) -> StorageResult<RawScan> {
        self.with_conn(|conn| {
            Self::ensure_collection(conn, generation, collection)?;
            let mut stmt = conn.prepare_cached(
                "SELECT id, data, deleted FROM records
                 WHERE generation = ?1 AND collection = ?2 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![generation, collection], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut scan = RawScan::default();
            for (id, data, deleted) in rows {
                match Self::decode_row(generation, collection, id, &data, deleted) {
                    Ok(record) => scan.records.push(record),
                    Err(error) => scan.errors.push(error),
                }
            }
            Ok(scan)
        })
    }

    fn raw_get(
        &self,
        generation: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<Option<RawRecord>> {
        self.with_conn(|conn| {
            Self::ensure_collection(conn, generation, collection)?;
            let row: Option<(String, bool)> = conn
                .query_row(
                    "SELECT data, deleted FROM records
                     WHERE generation = ?1 AND collection = ?2 AND id = ?3",
                    params![generation, collection, id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|(data, deleted)| {
                Self::decode_row(generation, collection, id.to_string(), &data, deleted).map_err(
                    |e| StorageError::Corruption {
                        generation: generation.to_string(),
                        collection: collection.to_string(),
                        id: e.id,
                        message: e.error,
                    },
                )
            })
            .transpose()
        })
    }

    fn put_records(
        &self,
        generation: &str,
        collection: &str,
        records: &[(String, Value)],
    ) -> StorageResult<()> {
        self.with_conn(|conn| {
            Self::ensure_collection(conn, generation, collection)?;
            let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO records (generation, collection, id, data, deleted)
                     VALUES (?1, ?2, ?3, ?4, 0)",
                )?;
                for (id, data) in records {
                    stmt.execute(params![generation, collection, id, serde_json::to_string(data)?])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn remove_record(&self, generation: &str, collection: &str, id: &str) -> StorageResult<bool> {
        self.with_conn(|conn| {
            Self::ensure_collection(conn, generation, collection)?;
            let changed = conn.execute(
                "UPDATE records SET deleted = 1, data = 'null'
                 WHERE generation = ?1 AND collection = ?2 AND id = ?3 AND deleted = 0",
                params![generation, collection, id],
            )?;
            Ok(changed > 0)
        })
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
    }

    fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn delete_meta(&self, key: &str) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    fn claim_meta(&self, key: &str, value: &str) -> StorageResult<String> {
        self.with_conn(|conn| {
            let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            let winner: String =
                tx.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })?;
            tx.commit()?;
            Ok(winner)
        })
    }
}
