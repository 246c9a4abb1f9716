use std::collections::BTreeMap;

// ============================================================================
// SchemaNode Types
// ============================================================================

/// A schema node describing the shape and type constraints of a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String,
    Number,
    Boolean,
    /// ISO 8601 timestamp string.
    Date,
    Optional(Box<SchemaNode>),
    Array(Box<SchemaNode>),
    Object(BTreeMap<String, SchemaNode>),
    /// Auto-field: unique record identifier.
    Key,
    /// Auto-field: last-modified timestamp, the conflict signal.
    UpdatedAt,
}

// ============================================================================
// Schema Builder API (`t` module)
// ============================================================================

/// Schema builder helpers. Usage: `t::string()`, `t::optional(t::date())`, etc.
pub mod t {
    use super::SchemaNode;
    use std::collections::BTreeMap;

    pub fn string() -> SchemaNode {
        SchemaNode::String
    }

    pub fn number() -> SchemaNode {
        SchemaNode::Number
    }

    pub fn boolean() -> SchemaNode {
        SchemaNode::Boolean
    }

    pub fn date() -> SchemaNode {
        SchemaNode::Date
    }

    pub fn optional(inner: SchemaNode) -> SchemaNode {
        SchemaNode::Optional(Box::new(inner))
    }

    pub fn array(element: SchemaNode) -> SchemaNode {
        SchemaNode::Array(Box::new(element))
    }

    pub fn object<'a>(properties: impl IntoIterator<Item = (&'a str, SchemaNode)>) -> SchemaNode {
        SchemaNode::Object(
            properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

// ============================================================================
// Predicate Helpers
// ============================================================================

/// Returns true for Key and UpdatedAt, the fields every record carries.
pub fn is_auto_field(node: &SchemaNode) -> bool {
    matches!(node, SchemaNode::Key | SchemaNode::UpdatedAt)
}

/// Returns true for node types holding a timestamp.
pub fn is_timestamp_node(node: &SchemaNode) -> bool {
    matches!(node, SchemaNode::Date | SchemaNode::UpdatedAt)
}
