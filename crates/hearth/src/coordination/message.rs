use serde::{Deserialize, Serialize};

/// Migration lifecycle announcements exchanged between sessions.
///
/// Serialized with a `type` tag: `{"type":"PROGRESS","progress":40,"step":"tasks"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationMessage {
    Started,
    Progress { progress: u8, step: String },
    Complete,
    /// Carries no detail. Followers only learn that it failed.
    Failed,
}

/// A message plus the session that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: String,
    #[serde(flatten)]
    pub message: MigrationMessage,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, message: MigrationMessage) -> Self {
        Self {
            origin: origin.into(),
            message,
        }
    }
}
