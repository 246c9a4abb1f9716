//! Storage layer.
//!
//! - [`traits`]: [`StorageEngine`] (raw, maintenance) and [`RecordSource`].
//! - [`generation`]: [`GenerationStore`], the validating interface.
//! - [`memory`]: in-memory engine.
//! - [`sqlite`]: SQLite engine (feature `sqlite`).

pub mod generation;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use generation::GenerationStore;
pub use memory::MemoryEngine;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEngine;
pub use traits::{RawGeneration, RecordSource, StorageEngine, StorageResult};
