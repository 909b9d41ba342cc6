//! Deterministic idempotency keys
//!
//! A key is a pure function of compiler input, so recompiling an unchanged
//! source document reproduces the same key set. The apply engine relies on
//! that to recognize work that an earlier run already finished.

use crate::catalog::ActionType;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Hex characters kept from the BLAKE3 digest
const KEY_LEN: usize = 32;

/// Canonical JSON of a parameter map.
///
/// `BTreeMap` and `serde_json::Map` both serialize with sorted keys, so equal
/// parameter sets always produce identical bytes.
pub fn canonical_json(parameters: &BTreeMap<String, Value>) -> String {
    let object: Map<String, Value> = parameters
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(object).to_string()
}

/// Fingerprint of an action's parameters
pub fn parameter_fingerprint(parameters: &BTreeMap<String, Value>) -> String {
    blake3::hash(canonical_json(parameters).as_bytes())
        .to_hex()
        .to_string()
}

/// Key for one action: hash of source, type, entity and parameter fingerprint
pub fn idempotency_key(
    source_id: &str,
    action_type: ActionType,
    stable_entity_id: &str,
    fingerprint: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [source_id, action_type.as_str(), stable_entity_id, fingerprint] {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex()[..KEY_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_key_is_stable() {
        let fp = parameter_fingerprint(&params(json!({"title": "Bug"})));
        let a = idempotency_key("src", ActionType::CreateIssue, "1", &fp);
        let b = idempotency_key("src", ActionType::CreateIssue, "1", &fp);
        assert_eq!(a, b);
        assert_eq!(a.len(), KEY_LEN);
    }

    #[test]
    fn test_key_changes_with_each_input() {
        let fp = parameter_fingerprint(&params(json!({"title": "Bug"})));
        let base = idempotency_key("src", ActionType::CreateIssue, "1", &fp);
        assert_ne!(base, idempotency_key("other", ActionType::CreateIssue, "1", &fp));
        assert_ne!(base, idempotency_key("src", ActionType::CreatePullRequest, "1", &fp));
        assert_ne!(base, idempotency_key("src", ActionType::CreateIssue, "2", &fp));

        let fp2 = parameter_fingerprint(&params(json!({"title": "Bug!"})));
        assert_ne!(base, idempotency_key("src", ActionType::CreateIssue, "1", &fp2));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 1}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 1, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(
            parameter_fingerprint(&params(a)),
            parameter_fingerprint(&params(b))
        );
    }

    #[test]
    fn test_canonical_json_is_sorted_and_never_empty() {
        assert_eq!(canonical_json(&BTreeMap::new()), "{}");
        let json = canonical_json(&params(json!({"title": "Bug", "labels": {"z": 1, "a": null}})));
        assert_eq!(json, r#"{"labels":{"a":null,"z":1},"title":"Bug"}"#);
    }

    #[test]
    fn test_parts_are_delimited() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = idempotency_key("ab", ActionType::CreateIssue, "c", "");
        let b = idempotency_key("a", ActionType::CreateIssue, "bc", "");
        assert_ne!(a, b);
    }
}
