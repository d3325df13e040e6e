// ── Payload helpers ──
//
// Payloads are flat JSON objects. Merges are shallow: nested objects
// are replaced wholesale, never merged key by key.

use serde_json::{Map, Value};

/// Field map carried by commands and stored in resources.
pub type Payload = Map<String, Value>;

/// Shallow union of two payloads. Keys in `later` win.
pub fn union(earlier: &Payload, later: &Payload) -> Payload {
    let mut merged = earlier.clone();
    for (key, value) in later {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Drop every field of `candidate` whose value already equals the one in
/// `existing`. What remains is the set of fields that actually change.
pub fn diff(candidate: &Payload, existing: &Payload) -> Payload {
    candidate
        .iter()
        .filter(|(key, value)| existing.get(key.as_str()) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn union_prefers_later_fields() {
        let earlier = payload(json!({ "name": "a", "color": "red" }));
        let later = payload(json!({ "name": "b", "size": 3 }));

        let merged = union(&earlier, &later);

        assert_eq!(
            Value::Object(merged),
            json!({ "name": "b", "color": "red", "size": 3 })
        );
    }

    #[test]
    fn union_replaces_nested_objects_wholesale() {
        let earlier = payload(json!({ "meta": { "a": 1, "b": 2 } }));
        let later = payload(json!({ "meta": { "c": 3 } }));

        let merged = union(&earlier, &later);

        assert_eq!(Value::Object(merged), json!({ "meta": { "c": 3 } }));
    }

    #[test]
    fn diff_keeps_only_changed_fields() {
        let candidate = payload(json!({ "name": "same", "color": "blue", "new": true }));
        let existing = payload(json!({ "name": "same", "color": "red" }));

        let changed = diff(&candidate, &existing);

        assert_eq!(Value::Object(changed), json!({ "color": "blue", "new": true }));
    }

    #[test]
    fn diff_against_identical_payload_is_empty() {
        let candidate = payload(json!({ "name": "x" }));
        assert!(diff(&candidate, &candidate.clone()).is_empty());
    }
}
