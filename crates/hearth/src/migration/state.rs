use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Lifecycle of one migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Idle,
    Checking,
    Copying,
    Validating,
    Done,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Copying => "copying",
            Self::Validating => "validating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Whether a migration is in flight.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Checking | Self::Copying | Self::Validating)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use MigrationStatus::*;
        matches!(
            (self, next),
            (Idle, Checking)
                | (Idle, Copying)
                | (Checking, Idle)
                | (Checking, Copying)
                | (Checking, Failed)
                | (Copying, Validating)
                | (Copying, Failed)
                | (Validating, Done)
                | (Validating, Failed)
                | (Failed, Copying)
                | (Failed, RolledBack)
                | (RolledBack, Checking)
                | (RolledBack, Copying)
        )
    }

    pub fn transition(self, next: Self) -> Result<Self, MigrationError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MigrationError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable migration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub status: MigrationStatus,
    /// 0..=100
    pub progress: u8,
    pub current_step: String,
    pub error: Option<String>,
}

impl Default for MigrationState {
    fn default() -> Self {
        Self {
            status: MigrationStatus::Idle,
            progress: 0,
            current_step: String::new(),
            error: None,
        }
    }
}
