//! Deterministic cache key construction.
//!
//! A key is `<namespace>:<sha256 hex>` where the digest covers the
//! parameters in canonical form: entries sorted by name, values rendered as
//! JSON with object members sorted recursively. Null-valued parameters are
//! dropped, so `{a: 1, b: null}` and `{a: 1}` address the same entry.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Build a cache key from a namespace and an unordered parameter set.
pub fn build_key(namespace: &str, params: &Map<String, Value>) -> String {
    let mut entries: Vec<(&String, &Value)> = params.iter().filter(|(_, v)| !v.is_null()).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (name, value) in entries {
        let mut line = String::new();
        push_json_string(&mut line, name);
        line.push('=');
        push_canonical(&mut line, value);
        line.push('\n');
        hasher.update(line.as_bytes());
    }

    format!("{namespace}:{}", hex::encode(hasher.finalize()))
}

fn push_json_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_owned()).to_string());
}

fn push_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_string(out, k);
                out.push(':');
                push_canonical(out, v);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_key_order_independent() {
        let k1 = build_key("ns", &params(json!({"a": 1, "b": 2})));
        let k2 = build_key("ns", &params(json!({"b": 2, "a": 1})));
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_key_nested_order_independent() {
        let k1 = build_key("ns", &params(json!({"filter": {"x": 1, "y": [1, 2]}})));
        let k2 = build_key("ns", &params(json!({"filter": {"y": [1, 2], "x": 1}})));
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_key_distinguishes_values_and_types() {
        let k1 = build_key("ns", &params(json!({"a": 1})));
        let k2 = build_key("ns", &params(json!({"a": 2})));
        let k3 = build_key("ns", &params(json!({"a": "1"})));
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_key_distinguishes_namespaces() {
        let p = params(json!({"symbol": "AAPL"}));
        assert_ne!(build_key("price", &p), build_key("historical", &p));
    }

    #[test]
    fn test_key_ignores_nulls() {
        let k1 = build_key("ns", &params(json!({"a": 1, "b": null})));
        let k2 = build_key("ns", &params(json!({"a": 1})));
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_key_separator_cannot_be_forged() {
        let k1 = build_key("ns", &params(json!({"a": "1\n\"b\"=2"})));
        let k2 = build_key("ns", &params(json!({"a": "1", "b": 2})));
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_key_format() {
        let key = build_key("price", &params(json!({"symbol": "AAPL"})));
        let (ns, digest) = key.split_once(':').unwrap();
        assert_eq!(ns, "price");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
