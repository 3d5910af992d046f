//! Cache-key fingerprinting.
//!
//! A fingerprint is the hex SHA-256 of four components: the operator's
//! structure signature, the input *shape* signature, the selected strategy
//! name and the option flags. Input content never participates unless an
//! operator declares content-aware keys: those keys' values are folded in
//! so records that must not share a compiled artifact do not.

use operon_core::operator::{Operator, Structure};
use operon_core::record::{shape_signature, Record};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Compute the cache fingerprint for an operator/input/strategy triple.
pub fn fingerprint(
    operator: &dyn Operator,
    inputs: &Record,
    strategy: &str,
    option_flags: &str,
) -> String {
    let structure = operator.structure();
    let mut hasher = Sha256::new();
    hasher.update(structure.signature().as_bytes());
    hasher.update(b"|");
    hasher.update(shape_signature(inputs).as_bytes());
    hasher.update(b"|");
    hasher.update(strategy.as_bytes());
    hasher.update(b"|");
    hasher.update(option_flags.as_bytes());

    for key in content_keys(operator, &structure) {
        if let Some(value) = inputs.get(&key) {
            hasher.update(b"|");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

/// Content-aware keys declared anywhere in the operator tree, sorted.
fn content_keys(operator: &dyn Operator, structure: &Structure) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = operator.content_keys().iter().cloned().collect();
    collect(structure, &mut keys);
    keys
}

fn collect(structure: &Structure, keys: &mut BTreeSet<String>) {
    if let Some(payload) = &structure.payload {
        keys.extend(payload.content_keys().iter().cloned());
    }
    for child in &structure.children {
        collect(child, keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operon_core::ops::{map, opaque, sequence};
    use operon_core::record::record_from;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_same_shape_same_fingerprint() {
        let op = sequence(vec![Arc::new(map("inc", Ok)), Arc::new(map("dbl", Ok))]);
        let a = fingerprint(&op, &record_from(vec![("v", json!(1))]), "structural", "ps=1");
        let b = fingerprint(&op, &record_from(vec![("v", json!(99))]), "structural", "ps=1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_change_changes_fingerprint() {
        let op = sequence(vec![Arc::new(map("inc", Ok))]);
        let a = fingerprint(&op, &record_from(vec![("v", json!(1))]), "structural", "");
        let b = fingerprint(&op, &record_from(vec![("v", json!("text"))]), "structural", "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_strategy_and_flags_partition_the_cache() {
        let op = sequence(vec![Arc::new(map("inc", Ok))]);
        let inputs = record_from(vec![("v", json!(1))]);
        let a = fingerprint(&op, &inputs, "structural", "ps=1");
        let b = fingerprint(&op, &inputs, "trace", "ps=1");
        let c = fingerprint(&op, &inputs, "structural", "ps=0");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_content_aware_keys_fold_in_values() {
        let op = opaque("routing", |r: operon_core::Record| {
            Box::pin(async move { Ok(r) })
        })
        .with_content_keys(vec!["tenant".to_string()]);

        let a = fingerprint(&op, &record_from(vec![("tenant", json!("acme"))]), "s", "");
        let b = fingerprint(&op, &record_from(vec![("tenant", json!("globex"))]), "s", "");
        assert_ne!(a, b);
    }
}
