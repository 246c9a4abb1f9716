//! Runtime options shared by every component of a session.

use serde::{Deserialize, Serialize};

/// Options for a hearth session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HearthOptions {
    /// Version of the running app binary (`major.minor.patch`).
    pub app_version: String,
    /// Wire protocol version advertised to peers.
    pub protocol_version: u32,
    /// Records written per batch while copying a collection.
    pub batch_size: usize,
    /// Records per collection checked when sampling a generation's shape.
    pub sample_size: usize,
    /// Number of recent replication events kept for display.
    pub recent_event_capacity: usize,
}

impl Default for HearthOptions {
    fn default() -> Self {
        Self {
            app_version: "0.1.0".to_string(),
            protocol_version: 1,
            batch_size: 200,
            sample_size: 5,
            recent_event_capacity: 20,
        }
    }
}

impl HearthOptions {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
            ..Self::default()
        }
    }

    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}
