//! Canonical JSON encoding and SHA-256 digests
//!
//! Canonical form: object keys sorted lexicographically at every depth, no
//! insignificant whitespace. Key order is enforced here rather than relying
//! on `serde_json`'s map type, which changes under the `preserve_order`
//! feature.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Serialize any value into canonical JSON
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CryptoError> {
    let value = serde_json::to_value(value).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    let mut out = String::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CryptoError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&encode_scalar(&Value::String((*key).clone()))?);
                out.push(':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&encode_scalar(scalar)?),
    }
    Ok(())
}

fn encode_scalar(value: &Value) -> Result<String, CryptoError> {
    serde_json::to_string(value).map_err(|e| CryptoError::Canonicalization(e.to_string()))
}

/// Lowercase hex SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of a value's canonical JSON
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, CryptoError> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_without_whitespace() {
        let value = json!({"b": 1, "a": {"d": [1, 2], "c": true}, "e": "x y"});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":{"c":true,"d":[1,2]},"b":1,"e":"x y"}"#
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
        assert_eq!(canonical_hash(&a).unwrap().len(), 64);
    }
}
