//! Document transforms: legacy record → current schema.
//!
//! Every transform is total. Whatever the input, the outcome is either a
//! record that validates against the collection schema or an explicit
//! [`TransformOutcome::Reject`]. A custom transform registered for a
//! collection runs first; the schema-driven pass ([`conform_record`]) always
//! runs after it, so custom code cannot produce an invalid record.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::schema::validate::type_name;
use crate::schema::{is_valid_iso_date, Catalog, CollectionSchema, SchemaNode};
use crate::types::{parse_iso, parse_timestamp, to_iso, EPOCH_ISO, ID_FIELD, UPDATED_AT_FIELD};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    Accept(Value),
    Reject(String),
}

impl TransformOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }

    pub fn accepted(self) -> Option<Value> {
        match self {
            Self::Accept(v) => Some(v),
            Self::Reject(_) => None,
        }
    }
}

pub type TransformFn = dyn Fn(&Value) -> TransformOutcome + Send + Sync;

// ============================================================================
// TransformRegistry
// ============================================================================

pub struct TransformRegistry {
    catalog: Arc<Catalog>,
    custom: HashMap<String, Arc<TransformFn>>,
}

impl TransformRegistry {
    /// A registry with only the schema-driven transform for every collection.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            custom: HashMap::new(),
        }
    }

    /// Default registry plus the upgrades for the app's own historical field
    /// names (`thoughts.content` → `rawInput`, `tasks.text` → `title`).
    pub fn with_app_upgrades(catalog: Arc<Catalog>) -> Self {
        Self::new(catalog)
            .with("thoughts", |record| rename_field(record, "content", "rawInput"))
            .with("tasks", |record| rename_field(record, "text", "title"))
    }

    /// Override the transform for `collection`. Panics when the collection is
    /// not in the catalog.
    pub fn register(
        &mut self,
        collection: &str,
        transform: impl Fn(&Value) -> TransformOutcome + Send + Sync + 'static,
    ) -> &mut Self {
        assert!(
            self.catalog.get(collection).is_some(),
            "Cannot register a transform for unknown collection \"{collection}\""
        );
        self.custom.insert(collection.to_string(), Arc::new(transform));
        self
    }

    pub fn with(
        mut self,
        collection: &str,
        transform: impl Fn(&Value) -> TransformOutcome + Send + Sync + 'static,
    ) -> Self {
        self.register(collection, transform);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn transform(&self, collection: &str, record: &Value) -> TransformOutcome {
        let Some(schema) = self.catalog.get(collection) else {
            return TransformOutcome::Reject(format!("unknown collection \"{collection}\""));
        };

        let input = match self.custom.get(collection) {
            None => record.clone(),
            Some(custom) => match catch_unwind(AssertUnwindSafe(|| custom(record))) {
                Ok(TransformOutcome::Accept(value)) => value,
                Ok(reject) => return reject,
                Err(_) => {
                    return TransformOutcome::Reject(format!(
                        "custom transform for \"{collection}\" panicked"
                    ))
                }
            },
        };

        conform_record(schema, input)
    }
}

fn rename_field(record: &Value, from: &str, to: &str) -> TransformOutcome {
    let mut out = record.clone();
    if let Value::Object(map) = &mut out {
        if !map.contains_key(to) {
            if let Some(value) = map.remove(from) {
                map.insert(to.to_string(), value);
            }
        }
    }
    TransformOutcome::Accept(out)
}

// ============================================================================
// Schema-driven conformance
// ============================================================================

/// Bring an arbitrary value into the shape of `schema`.
///
/// Strips `_`-prefixed bookkeeping keys, requires a primary key (an integer id
/// is turned into its decimal string), fills missing fields with defaults and
/// coerces mismatched scalar types. Fields unknown to the schema are kept.
pub fn conform_record(schema: &CollectionSchema, record: Value) -> TransformOutcome {
    let Value::Object(source) = record else {
        return TransformOutcome::Reject(format!("expected object, received {}", type_name(&record)));
    };

    let mut map: Map<String, Value> = source
        .into_iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .collect();

    let id = match map.remove(ID_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
        _ => return TransformOutcome::Reject("record has no primary key".to_string()),
    };

    let updated_at = map
        .remove(UPDATED_AT_FIELD)
        .and_then(|v| normalize_date(&v))
        .unwrap_or_else(|| EPOCH_ISO.to_string());

    for (field, node) in &schema.fields {
        if field == ID_FIELD || field == UPDATED_AT_FIELD {
            continue;
        }
        let current = map.remove(field);
        match coerce(node, current, &updated_at, 0) {
            Ok(value) => {
                map.insert(field.clone(), value);
            }
            Err(reason) => return TransformOutcome::Reject(format!("{field}: {reason}")),
        }
    }

    map.insert(ID_FIELD.to_string(), Value::String(id));
    map.insert(UPDATED_AT_FIELD.to_string(), Value::String(updated_at));

    let record = Value::Object(map);
    match schema.validate(&record) {
        Ok(()) => TransformOutcome::Accept(record),
        Err(e) => TransformOutcome::Reject(e.to_string()),
    }
}

/// An ISO string for any parseable timestamp (RFC 3339 string or epoch
/// millis). Already-valid strings are kept verbatim.
fn normalize_date(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if is_valid_iso_date(s) => Some(s.clone()),
        Value::String(s) => parse_iso(s.trim()).map(to_iso),
        other => parse_timestamp(other).map(to_iso),
    }
}

fn coerce(
    node: &SchemaNode,
    value: Option<Value>,
    date_default: &str,
    depth: usize,
) -> Result<Value, String> {
    if depth > MAX_DEPTH {
        return Err("too deeply nested".to_string());
    }
    let value = value.filter(|v| !v.is_null());

    match node {
        SchemaNode::String | SchemaNode::Key => match value {
            None => Ok(Value::String(String::new())),
            Some(Value::String(s)) => Ok(Value::String(s)),
            Some(Value::Number(n)) => Ok(Value::String(n.to_string())),
            Some(Value::Bool(b)) => Ok(Value::String(b.to_string())),
            Some(other) => Err(format!("cannot coerce {} to string", type_name(&other))),
        },

        SchemaNode::Number => match value {
            None => Ok(Value::from(0)),
            Some(Value::Number(n)) => Ok(Value::Number(n)),
            Some(Value::Bool(b)) => Ok(Value::from(u8::from(b))),
            Some(Value::String(s)) => parse_number(s.trim())
                .ok_or_else(|| format!("cannot coerce {s:?} to number")),
            Some(other) => Err(format!("cannot coerce {} to number", type_name(&other))),
        },

        SchemaNode::Boolean => match value {
            None => Ok(Value::Bool(false)),
            Some(Value::Bool(b)) => Ok(Value::Bool(b)),
            Some(Value::Number(n)) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" | "" => Ok(Value::Bool(false)),
                _ => Err(format!("cannot coerce {s:?} to boolean")),
            },
            Some(other) => Err(format!("cannot coerce {} to boolean", type_name(&other))),
        },

        SchemaNode::Date | SchemaNode::UpdatedAt => match value {
            None => Ok(Value::String(date_default.to_string())),
            Some(v @ (Value::String(_) | Value::Number(_))) => Ok(Value::String(
                normalize_date(&v).unwrap_or_else(|| date_default.to_string()),
            )),
            Some(other) => Err(format!("cannot coerce {} to date", type_name(&other))),
        },

        // An optional date that cannot be read is absent, not defaulted.
        SchemaNode::Optional(inner) => match (inner.as_ref(), value) {
            (_, None) => Ok(Value::Null),
            (SchemaNode::Date, Some(v)) => Ok(normalize_date(&v).map_or(Value::Null, Value::String)),
            (_, Some(v)) => Ok(coerce(inner, Some(v), date_default, depth + 1).unwrap_or(Value::Null)),
        },

        SchemaNode::Array(element) => match value {
            None => Ok(Value::Array(Vec::new())),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| coerce(element, Some(item), date_default, depth + 1))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Some(Value::Object(_)) => Err("cannot coerce object to array".to_string()),
            Some(scalar) => Ok(Value::Array(vec![coerce(
                element,
                Some(scalar),
                date_default,
                depth + 1,
            )?])),
        },

        SchemaNode::Object(props) => {
            let mut map = match value {
                None => Map::new(),
                Some(Value::Object(map)) => map,
                Some(other) => {
                    return Err(format!("cannot coerce {} to object", type_name(&other)))
                }
            };
            conform_props(props, &mut map, date_default, depth + 1)?;
            Ok(Value::Object(map))
        }
    }
}

fn conform_props(
    props: &BTreeMap<String, SchemaNode>,
    map: &mut Map<String, Value>,
    date_default: &str,
    depth: usize,
) -> Result<(), String> {
    for (key, node) in props {
        let current = map.remove(key);
        let value = coerce(node, current, date_default, depth).map_err(|e| format!("{key}.{e}"))?;
        map.insert(key.clone(), value);
    }
    Ok(())
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
