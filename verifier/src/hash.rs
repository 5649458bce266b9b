//! Content fingerprints for prepared requests.
//!
//! Objects are written with their keys sorted, independent of the map
//! implementation `serde_json` was built with, so two value-equal requests
//! always produce the same text and therefore the same 128-bit digest.

use crate::error::VerifierResult;
use serde::Serialize;
use serde_json::Value;

/// Hex-encoded MD5 digest of the canonical JSON form of `value`.
pub fn content_hash<T: Serialize>(value: &T) -> VerifierResult<String> {
    let value = serde_json::to_value(value)?;
    let canonical = canonical_json(&value)?;
    Ok(format!("{:x}", md5::compute(canonical.as_bytes())))
}

/// Compact JSON with object keys in sorted order and non-ASCII left unescaped.
pub fn canonical_json(value: &Value) -> VerifierResult<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> VerifierResult<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(value, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ChatMessage, ChatRequest};
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": "é"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":"é","y":[1,2]},"b":1}"#).unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_is_deterministic_and_128_bit() {
        let request = ChatRequest::new("m", vec![ChatMessage::user("hi")]);
        let first = content_hash(&request).unwrap();
        assert_eq!(first, content_hash(&request.clone()).unwrap());
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = ChatRequest::new("m", vec![ChatMessage::user("hi")]);
        let b = ChatRequest::new("m", vec![ChatMessage::user("hello")]);
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"z": [{"b": 2, "a": 1}], "a": "Привет"});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":"Привет","z":[{"a":1,"b":2}]}"#
        );
    }
}
