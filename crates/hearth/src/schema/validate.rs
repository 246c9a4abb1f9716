use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ValidationError, ValidationErrors};

use super::node::SchemaNode;

// ============================================================================
// ISO 8601 Date Regex
// ============================================================================

fn iso_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d{1,9})?(?:Z|[+-]\d{2}:\d{2})?$")
            .expect("ISO date regex is valid")
    })
}

/// Format check plus semantic check via chrono (rejects `2024-02-31`).
pub fn is_valid_iso_date(s: &str) -> bool {
    iso_date_regex().is_match(s) && crate::types::parse_iso(s).is_some()
}

// ============================================================================
// Validation Context
// ============================================================================

struct ValidationContext {
    errors: Vec<ValidationError>,
    path: Vec<String>,
}

impl ValidationContext {
    fn new() -> Self {
        Self {
            errors: vec![],
            path: vec![],
        }
    }

    fn push_key(&mut self, key: impl Into<String>) {
        self.path.push(key.into());
    }

    fn push_index(&mut self, idx: usize) {
        self.path.push(format!("[{idx}]"));
    }

    fn pop(&mut self) {
        self.path.pop();
    }

    fn current_path(&self) -> String {
        self.path.join(".").replace(".[", "[")
    }

    fn add_error(&mut self, expected: impl Into<String>, received: impl Into<String>) {
        self.errors.push(ValidationError {
            path: self.current_path(),
            expected: expected.into(),
            received: received.into(),
        });
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

const MAX_DEPTH: usize = 64;

// ============================================================================
// Core Walker
// ============================================================================

fn walk(schema: &SchemaNode, value: &Value, ctx: &mut ValidationContext, depth: usize) {
    if depth > MAX_DEPTH {
        ctx.add_error("value within nesting limit", "too deeply nested");
        return;
    }

    match schema {
        SchemaNode::String => {
            if !value.is_string() {
                ctx.add_error("string", type_name(value));
            }
        }

        SchemaNode::Number => {
            if !value.is_number() {
                ctx.add_error("number", type_name(value));
            }
        }

        SchemaNode::Boolean => {
            if !value.is_boolean() {
                ctx.add_error("boolean", type_name(value));
            }
        }

        SchemaNode::Key => match value.as_str() {
            Some(s) if !s.is_empty() => {}
            Some(_) => ctx.add_error("non-empty string (key)", "empty string"),
            None => ctx.add_error("non-empty string (key)", type_name(value)),
        },

        SchemaNode::Date | SchemaNode::UpdatedAt => match value.as_str() {
            Some(s) if is_valid_iso_date(s) => {}
            Some(_) => ctx.add_error("ISO 8601 string", "malformed date string"),
            None => ctx.add_error("ISO 8601 string", type_name(value)),
        },

        SchemaNode::Optional(inner) => {
            if !value.is_null() {
                walk(inner, value, ctx, depth + 1);
            }
        }

        SchemaNode::Array(element) => match value.as_array() {
            None => ctx.add_error("array", type_name(value)),
            Some(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    ctx.push_index(i);
                    walk(element, item, ctx, depth + 1);
                    ctx.pop();
                }
            }
        },

        SchemaNode::Object(props) => match value.as_object() {
            None => ctx.add_error("object", type_name(value)),
            Some(map) => walk_fields(props, map, ctx, depth),
        },
    }
}

fn walk_fields(
    props: &BTreeMap<String, SchemaNode>,
    map: &Map<String, Value>,
    ctx: &mut ValidationContext,
    depth: usize,
) {
    for (key, prop_schema) in props {
        ctx.push_key(key);
        let prop_value = map.get(key).unwrap_or(&Value::Null);
        walk(prop_schema, prop_value, ctx, depth + 1);
        ctx.pop();
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Validate `value` against `schema`. Fields not named by an object schema are
/// allowed and left untouched.
pub fn validate(schema: &SchemaNode, value: &Value) -> Result<(), ValidationErrors> {
    let mut ctx = ValidationContext::new();
    walk(schema, value, &mut ctx, 0);
    finish(ctx)
}

/// Validate a top-level record against a field map without building an
/// intermediate `SchemaNode::Object`.
pub fn validate_fields(
    fields: &BTreeMap<String, SchemaNode>,
    value: &Value,
) -> Result<(), ValidationErrors> {
    let mut ctx = ValidationContext::new();
    match value.as_object() {
        Some(map) => walk_fields(fields, map, &mut ctx, 0),
        None => ctx.add_error("object", type_name(value)),
    }
    finish(ctx)
}

fn finish(ctx: ValidationContext) -> Result<(), ValidationErrors> {
    if ctx.errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(ctx.errors))
    }
}
