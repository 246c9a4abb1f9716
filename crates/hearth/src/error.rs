use std::fmt;
use thiserror::Error;

use crate::migration::state::MigrationStatus;

// ---------------------------------------------------------------------------
// ValidationError / ValidationErrors
// ---------------------------------------------------------------------------

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub expected: String,
    pub received: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"Validation failed at "{}": expected {}, received {}"#,
            self.path, self.expected, self.received
        )
    }
}

impl std::error::Error for ValidationError {}

/// One or more `ValidationError`s collected from a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed:")?;
        for e in &self.0 {
            write!(f, "\n  - {}: expected {}, received {}", e.path, e.expected, e.received)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Generation \"{0}\" does not exist")]
    GenerationNotFound(String),

    #[error(
        "Generation \"{generation}\" already exists with a different schema for \"{collection}\""
    )]
    GenerationConflict {
        generation: String,
        collection: String,
    },

    #[error(
        "Schema mismatch opening \"{generation}\": collection \"{collection}\" is stored at \
         v{stored}, expected v{expected}"
    )]
    SchemaMismatch {
        generation: String,
        collection: String,
        stored: u32,
        expected: u32,
    },

    #[error("Collection \"{collection}\" is not part of generation \"{generation}\"")]
    CollectionNotRegistered {
        generation: String,
        collection: String,
    },

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Record in \"{collection}\" has no usable id")]
    MissingId { collection: String },

    #[error("Invalid record {collection}/{id}: {source}")]
    Invalid {
        collection: String,
        id: String,
        #[source]
        source: ValidationErrors,
    },

    #[error("Storage corruption in {generation}/{collection}/{id}: {message}")]
    Corruption {
        generation: String,
        collection: String,
        id: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "Local data was written by app version {recorded}, which is newer than the running \
         version {running}. Update the app or wipe local data."
    )]
    Downgrade { recorded: String, running: String },

    #[error("Invalid app version \"{0}\"")]
    InvalidVersion(String),

    #[error("Version ledger is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// MigrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration transition: {from} -> {to}")]
    InvalidTransition {
        from: MigrationStatus,
        to: MigrationStatus,
    },

    #[error("No active generation is recorded in the version ledger")]
    NoActiveGeneration,

    #[error("Validation of \"{collection}\" in the new generation failed: {message}")]
    Validation { collection: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// BroadcastError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast channel \"{0}\" is closed")]
    Closed(String),

    #[error("Failed to encode broadcast message: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// ReplicationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Remote entry {collection}/{key} was rejected: {reason}")]
    RemoteRejected {
        collection: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// InviteError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("Invite token is not valid base64")]
    Encoding,

    #[error("Invite token is malformed: {0}")]
    Malformed(String),

    #[error("Invite room id is invalid")]
    InvalidRoomId,

    #[error("Invite secret must be 16-128 characters without ':'")]
    InvalidSecret,

    #[error("Invite link has no join fragment")]
    MissingFragment,
}

// ---------------------------------------------------------------------------
// SettingsError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Device name must be 1-64 characters, got {0:?}")]
    InvalidDeviceName(String),

    #[error("Stored device settings are corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No sync space is configured. Create or join one first.")]
    NoRoom,

    #[error("Failed to connect to sync space: {0}")]
    Connect(String),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Invite(#[from] InviteError),
}

// ---------------------------------------------------------------------------
// HearthError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HearthError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Invite(#[from] InviteError),
}

/// Convenience alias: the default error type is `HearthError`.
pub type Result<T, E = HearthError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
