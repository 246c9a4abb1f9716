//! Schema migration between store generations.
//!
//! - [`state`]: [`MigrationStatus`] state machine and [`MigrationState`].
//! - [`legacy`]: raw reads of prior generations.
//! - [`transform`]: total per-collection record transforms.
//! - [`orchestrator`]: [`MigrationOrchestrator`]: check, execute, rollback.
//! - [`backup`]: [`BackupSnapshot`] export.

pub mod backup;
pub mod legacy;
pub mod orchestrator;
pub mod state;
pub mod transform;

pub use backup::BackupSnapshot;
pub use legacy::LegacyReader;
pub use orchestrator::{
    copy_progress, CollectionReport, MigrationOrchestrator, MigrationReport, EPOCH_KEY,
    PENDING_KEY,
};
pub use state::{MigrationState, MigrationStatus};
pub use transform::{conform_record, TransformFn, TransformOutcome, TransformRegistry};
