//! hearth: on-device store generations with exactly-once schema migration
//! across racing sessions, and last-write-wins replication across devices.
//!
//! # Modules
//!
//! - [`schema`]: field types, validation and the collection [`schema::Catalog`].
//! - [`storage`]: the raw [`storage::StorageEngine`] and the validating
//!   [`storage::GenerationStore`].
//! - [`ledger`]: the [`ledger::VersionLedger`] pointing at the active generation.
//! - [`migration`]: legacy reader, transform registry and orchestrator.
//! - [`coordination`]: cross-session broadcast and leader election.
//! - [`replication`]: replicated document traits and the LWW bridge.
//! - [`awareness`]: peer grouping and protocol-skew detection.
//! - [`sync`]: device settings, invites and the [`sync::SyncController`].
//! - [`session`]: the application-root context and startup flow.

pub mod error;
pub mod options;
pub mod types;

pub mod awareness;
pub mod coordination;
pub mod ledger;
pub mod migration;
pub mod reactive;
pub mod replication;
pub mod schema;
pub mod session;
pub mod storage;
pub mod sync;

pub use error::{HearthError, Result};
pub use options::HearthOptions;
pub use session::{HearthContext, Session, StartupOutcome};
