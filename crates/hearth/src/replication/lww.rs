//! Last-write-wins by `updatedAt`.
//!
//! Greater timestamp wins; exact ties keep the resident value. A record with
//! no usable timestamp loses to any record that has one.

use std::cmp::Ordering;

use serde_json::Value;

use crate::types::compare_updated_at;

/// Whether `incoming` should replace `resident`.
pub fn incoming_wins(incoming: &Value, resident: Option<&Value>) -> bool {
    match resident {
        None => true,
        Some(resident) => compare_updated_at(incoming, resident) == Ordering::Greater,
    }
}

/// The surviving value of two versions of one record.
pub fn merge<'a>(resident: &'a Value, incoming: &'a Value) -> &'a Value {
    if incoming_wins(incoming, Some(resident)) {
        incoming
    } else {
        resident
    }
}
