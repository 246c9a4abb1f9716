//! ChangeEvent: a mutation committed to a generation.

use serde_json::Value;

/// Emitted synchronously by `GenerationStore` after each committed write.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A record was inserted or replaced; `data` is the stored value.
    Put {
        collection: String,
        id: String,
        data: Value,
    },
    /// A live record was removed.
    Delete { collection: String, id: String },
    /// Several records were written in one batch.
    Bulk {
        collection: String,
        ids: Vec<String>,
    },
}

impl ChangeEvent {
    pub fn collection(&self) -> &str {
        match self {
            Self::Put { collection, .. }
            | Self::Delete { collection, .. }
            | Self::Bulk { collection, .. } => collection,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Put { id, .. } | Self::Delete { id, .. } => vec![id.as_str()],
            Self::Bulk { ids, .. } => ids.iter().map(String::as_str).collect(),
        }
    }
}
