//! Collection schemas and the ordered catalog the app declares.
//!
//! Auto-fields (`id`, `updatedAt`) are injected by [`CollectionSchema::new`].
//! Catalog order is significant: migration copies collections in this order,
//! so a collection may only reference collections declared before it.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::error::ValidationErrors;
use crate::types::{ID_FIELD, UPDATED_AT_FIELD};

use super::node::{t, SchemaNode};
use super::validate::validate_fields;

fn name_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("name regex is valid")
    })
}

/// Reserved auto-field names that collections cannot declare themselves.
pub(crate) const AUTO_FIELDS: &[&str] = &[ID_FIELD, UPDATED_AT_FIELD];

// ============================================================================
// CollectionSchema
// ============================================================================

/// The current shape of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub name: String,
    pub version: u32,
    /// Full field map including auto-fields.
    pub fields: BTreeMap<String, SchemaNode>,
}

impl CollectionSchema {
    /// Build a schema from user fields. Panics on an invalid collection name,
    /// a version of 0, or a field that shadows an auto-field.
    pub fn new<'a>(
        name: &str,
        version: u32,
        user_fields: impl IntoIterator<Item = (&'a str, SchemaNode)>,
    ) -> Self {
        assert!(
            name_regex().is_match(name),
            "Invalid collection name \"{name}\""
        );
        assert!(version >= 1, "Schema version must be >= 1, got {version}");

        let mut fields = BTreeMap::new();
        for (field, node) in user_fields {
            assert!(
                !AUTO_FIELDS.contains(&field),
                "Field \"{field}\" in \"{name}\" is reserved"
            );
            assert!(
                !field.starts_with('_'),
                "Field \"{field}\" in \"{name}\" uses the reserved '_' prefix"
            );
            fields.insert(field.to_string(), node);
        }
        fields.insert(ID_FIELD.to_string(), SchemaNode::Key);
        fields.insert(UPDATED_AT_FIELD.to_string(), SchemaNode::UpdatedAt);

        Self {
            name: name.to_string(),
            version,
            fields,
        }
    }

    pub fn validate(&self, record: &Value) -> Result<(), ValidationErrors> {
        validate_fields(&self.fields, record)
    }

    pub fn is_valid(&self, record: &Value) -> bool {
        self.validate(record).is_ok()
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Ordered set of collection schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    collections: Vec<Arc<CollectionSchema>>,
}

impl Catalog {
    /// Panics on duplicate collection names.
    pub fn new(collections: Vec<CollectionSchema>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for c in &collections {
            assert!(
                seen.insert(c.name.clone()),
                "Duplicate collection \"{}\" in catalog",
                c.name
            );
        }
        Self {
            collections: collections.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CollectionSchema>> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CollectionSchema>> {
        self.collections.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Collection name → schema version, as recorded in generation metadata.
    pub fn versions(&self) -> BTreeMap<String, u32> {
        self.collections
            .iter()
            .map(|c| (c.name.clone(), c.version))
            .collect()
    }

    /// The application's collections: thoughts, then projects, then tasks
    /// (tasks reference both).
    pub fn default_app() -> Self {
        Self::new(vec![
            CollectionSchema::new(
                "thoughts",
                2,
                [
                    ("rawInput", t::string()),
                    ("status", t::string()),
                    ("tags", t::array(t::string())),
                    ("createdAt", t::date()),
                    ("processedAt", t::optional(t::date())),
                ],
            ),
            CollectionSchema::new(
                "projects",
                2,
                [
                    ("name", t::string()),
                    ("description", t::string()),
                    ("color", t::optional(t::string())),
                    ("archived", t::boolean()),
                    ("createdAt", t::date()),
                ],
            ),
            CollectionSchema::new(
                "tasks",
                3,
                [
                    ("title", t::string()),
                    ("rawInput", t::string()),
                    ("done", t::boolean()),
                    ("priority", t::number()),
                    ("sourceThoughtId", t::string()),
                    ("projectId", t::optional(t::string())),
                    ("dueDate", t::optional(t::date())),
                    ("createdAt", t::date()),
                ],
            ),
        ])
    }
}
