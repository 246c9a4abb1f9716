//! Version ledger: the durable pointer to the active store generation.
//!
//! Stored as JSON under one fixed meta key, outside every generation, so it
//! can be read before any generation is opened. It also remembers the app
//! version that produced the active generation, which is how a downgraded
//! binary is detected before it touches data it does not understand.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::storage::StorageEngine;
use crate::types::now_iso;

pub const LEDGER_KEY: &str = "hearth:version-ledger";

// ============================================================================
// AppVersion
// ============================================================================

/// Dotted numeric version. Missing parts are 0; a pre-release suffix after
/// `-` is ignored for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl AppVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for AppVersion {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidVersion(s.to_string());
        let core = s.trim().trim_start_matches('v');
        let core = core.split_once('-').map_or(core, |(head, _)| head);
        if core.is_empty() {
            return Err(invalid());
        }

        let mut parts = [0u64; 3];
        for (i, part) in core.split('.').enumerate() {
            let slot = parts.get_mut(i).ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ============================================================================
// LedgerEntry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub active_generation: String,
    /// Version of the app that created `active_generation`.
    pub app_version: String,
    pub written_at: String,
}

impl LedgerEntry {
    pub fn version(&self) -> Result<AppVersion, LedgerError> {
        self.app_version.parse()
    }
}

// ============================================================================
// VersionLedger
// ============================================================================

#[derive(Clone)]
pub struct VersionLedger {
    engine: Arc<dyn StorageEngine>,
}

impl VersionLedger {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// The current pointer, or `None` on first run.
    pub fn get(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        match self.engine.get_meta(LEDGER_KEY)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| LedgerError::Corrupt(e.to_string())),
        }
    }

    /// True when the recorded creator version is newer than `running`.
    pub fn is_downgrade(&self, running: &AppVersion) -> Result<bool, LedgerError> {
        match self.get()? {
            None => Ok(false),
            Some(entry) => Ok(entry.version()?.cmp(running) == Ordering::Greater),
        }
    }

    /// Fail with `LedgerError::Downgrade` if the running binary is older than
    /// the one that wrote the ledger. Returns the entry otherwise.
    pub fn ensure_not_downgrade(
        &self,
        running: &AppVersion,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let entry = self.get()?;
        if let Some(entry) = &entry {
            let recorded = entry.version()?;
            if recorded > *running {
                return Err(LedgerError::Downgrade {
                    recorded: entry.app_version.clone(),
                    running: running.to_string(),
                });
            }
        }
        Ok(entry)
    }

    /// Point the ledger at `generation`, written by `app_version`.
    pub fn set(&self, generation: &str, app_version: &AppVersion) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            active_generation: generation.to_string(),
            app_version: app_version.to_string(),
            written_at: now_iso(),
        };
        let raw = serde_json::to_string(&entry).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        self.engine.set_meta(LEDGER_KEY, &raw)?;
        tracing::info!(generation = %generation, app_version = %app_version, "version ledger updated");
        Ok(entry)
    }

    /// Write the ledger only if none exists yet. Returns whichever entry is
    /// stored afterwards, so racing first boots agree on one generation.
    pub fn claim(&self, generation: &str, app_version: &AppVersion) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            active_generation: generation.to_string(),
            app_version: app_version.to_string(),
            written_at: now_iso(),
        };
        let raw = serde_json::to_string(&entry).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        let winner = self.engine.claim_meta(LEDGER_KEY, &raw)?;
        serde_json::from_str(&winner).map_err(|e| LedgerError::Corrupt(e.to_string()))
    }
}
