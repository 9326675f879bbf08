//! Before/after JSON diff for audit details
//!
//! Both sides are serialized to JSON and compared recursively. Nested
//! objects produce dotted paths (`amounts.discount`), arrays are compared as
//! a whole. Numbers compare with a small tolerance because money serializes
//! as a decimal float.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;

const FLOAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

/// Bookkeeping fields left out of snapshots and diffs
fn excluded_fields(target_type: &str) -> &'static [&'static str] {
    match target_type {
        "order" => &["status_history", "version", "updated_at"],
        "refund" => &["status_history", "version", "updated_at"],
        _ => &[],
    }
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(fa), Some(fb)) => (fa - fb).abs() < FLOAT_EPSILON,
        _ => a == b,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(va, vb)| values_equal(va, vb))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, va)| b.get(key).is_some_and(|vb| values_equal(va, vb)))
        }
        _ => a == b,
    }
}

fn diff_recursive(from: &Value, to: &Value, path: &str, changes: &mut Vec<FieldChange>) {
    if let (Value::Object(from_obj), Value::Object(to_obj)) = (from, to) {
        let keys: BTreeSet<&String> = from_obj.keys().chain(to_obj.keys()).collect();
        for key in keys {
            let field = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            let f = from_obj.get(key).unwrap_or(&Value::Null);
            let t = to_obj.get(key).unwrap_or(&Value::Null);
            diff_recursive(f, t, &field, changes);
        }
        return;
    }

    if !values_equal(from, to) {
        changes.push(FieldChange {
            field: path.to_string(),
            from: from.clone(),
            to: to.clone(),
        });
    }
}

fn to_filtered_json<T: Serialize>(value: &T, target_type: &str) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(mut json) => {
            if let Value::Object(obj) = &mut json {
                for field in excluded_fields(target_type) {
                    obj.remove(*field);
                }
            }
            Some(json)
        }
        Err(e) => {
            tracing::error!(target = "audit", error = %e, "Failed to serialize audit value");
            None
        }
    }
}

/// Full snapshot for create-style actions
pub fn create_snapshot<T: Serialize>(value: &T, target_type: &str) -> Value {
    to_filtered_json(value, target_type).unwrap_or_else(|| json!({"error": "serialization_failed"}))
}

/// `{"changes": [{"field", "from", "to"}, ...]}`
pub fn create_diff<T: Serialize>(from: &T, to: &T, target_type: &str) -> Value {
    let (Some(from_json), Some(to_json)) = (
        to_filtered_json(from, target_type),
        to_filtered_json(to, target_type),
    ) else {
        return json!({"error": "serialization_failed"});
    };

    let mut changes = Vec::new();
    diff_recursive(&from_json, &to_json, "", &mut changes);

    if changes.is_empty() {
        json!({"changes": [], "note": "no_changes_detected"})
    } else {
        json!({"changes": changes})
    }
}
