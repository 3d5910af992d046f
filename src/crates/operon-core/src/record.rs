//! Record type and merge semantics
//!
//! All operator I/O is a [`Record`]: an unordered string-keyed map of JSON
//! values. Records are immutable by convention: operators receive a record
//! and return a new one; merging is right-biased (the update wins on key
//! conflict).
//!
//! # Examples
//!
//! ```rust
//! use operon_core::record::{merge, Record};
//! use serde_json::json;
//!
//! let mut base = Record::new();
//! base.insert("v".to_string(), json!(3));
//!
//! let mut update = Record::new();
//! update.insert("a".to_string(), json!(4));
//!
//! let merged = merge(base, update);
//! assert_eq!(merged["v"], json!(3));
//! assert_eq!(merged["a"], json!(4));
//! ```

use serde_json::Value;
use std::collections::BTreeSet;

/// Unordered string-keyed map carried between operators.
pub type Record = serde_json::Map<String, Value>;

/// Merge `update` into `base`, right-biased.
///
/// Every key of `base` survives; keys present in `update` overwrite.
pub fn merge(mut base: Record, update: Record) -> Record {
    for (key, value) in update {
        base.insert(key, value);
    }
    base
}

/// Build a record from key/value pairs.
pub fn record_from(pairs: Vec<(&str, Value)>) -> Record {
    let mut record = Record::new();
    for (key, value) in pairs {
        record.insert(key.to_string(), value);
    }
    record
}

/// Keys an operator output *produced* relative to its input: keys absent
/// from the input, or whose value changed.
///
/// Parallel conflict detection compares produced-key sets across branches,
/// not whole records: every branch echoes the shared input back.
pub fn produced_keys(input: &Record, output: &Record) -> BTreeSet<String> {
    output
        .iter()
        .filter(|(key, value)| input.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Deterministic, content-free signature of a record's shape.
///
/// The signature covers the sorted key set and a recursive type tag per
/// value; it never covers scalar content, so two records with the same keys
/// and value types share a signature. Used by the JIT fingerprint and as the
/// `last_input_shape` artifact stat.
pub fn shape_signature(record: &Record) -> String {
    let mut parts: Vec<String> = record
        .iter()
        .map(|(key, value)| format!("{}:{}", key, type_tag(value)))
        .collect();
    parts.sort();
    format!("{{{}}}", parts.join(","))
}

fn type_tag(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) if n.is_f64() => "float".to_string(),
        Value::Number(_) => "int".to_string(),
        Value::String(_) => "str".to_string(),
        Value::Array(items) => match items.first() {
            Some(first) => format!("list[{}]", type_tag(first)),
            None => "list[]".to_string(),
        },
        Value::Object(map) => {
            let mut parts: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{}:{}", key, type_tag(value)))
                .collect();
            parts.sort();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Render a value the way prompt templating does: strings verbatim,
/// everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_is_right_biased() {
        let base = record_from(vec![("v", json!(1)), ("keep", json!("yes"))]);
        let update = record_from(vec![("v", json!(2))]);

        let merged = merge(base, update);
        assert_eq!(merged["v"], json!(2));
        assert_eq!(merged["keep"], json!("yes"));
    }

    #[test]
    fn test_produced_keys_ignores_echoed_input() {
        let input = record_from(vec![("v", json!(5))]);
        let output = record_from(vec![("v", json!(5)), ("a", json!(6))]);

        let produced = produced_keys(&input, &output);
        assert_eq!(produced.into_iter().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_produced_keys_detects_changed_value() {
        let input = record_from(vec![("v", json!(5))]);
        let output = record_from(vec![("v", json!(6))]);

        assert!(produced_keys(&input, &output).contains("v"));
    }

    #[test]
    fn test_shape_signature_is_content_free_and_ordered() {
        let a = record_from(vec![("x", json!(1)), ("y", json!("hi"))]);
        let b = record_from(vec![("y", json!("other")), ("x", json!(99))]);

        assert_eq!(shape_signature(&a), shape_signature(&b));
        assert_eq!(shape_signature(&a), "{x:int,y:str}");
    }

    #[test]
    fn test_shape_signature_recurses_into_objects() {
        let record = record_from(vec![("cfg", json!({"n": 1, "tags": ["a"]}))]);
        assert_eq!(shape_signature(&record), "{cfg:{n:int,tags:list[str]}}");
    }

    #[test]
    fn test_stringify_strings_verbatim() {
        assert_eq!(stringify(&json!("hello")), "hello");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!({"a": 1})), "{\"a\":1}");
    }
}
