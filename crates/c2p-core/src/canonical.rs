//! Canonical JSON and digests for checksum computation.
//!
//! Work item checksums must be reproducible across runs and independent of
//! the order in which attributes were inserted. Everything that feeds a
//! checksum is first converted into a [`serde_json::Value`] and then written
//! with object keys sorted at every nesting level, without whitespace.
//!
//! Rules:
//! - Compact: no whitespace between tokens.
//! - Object keys sorted lexicographically (recursive at every depth).
//! - Arrays preserve element order; callers sort them when order is not
//!   meaningful (e.g. linked work items).

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Produce a canonical JSON string from a [`serde_json::Value`].
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use c2p_core::canonical::canonicalize_json;
///
/// let val = json!({"title": "Door", "additional_attributes": {"b": 2, "a": 1}});
/// assert_eq!(
///     canonicalize_json(&val),
///     r#"{"additional_attributes":{"a":1,"b":2},"title":"Door"}"#
/// );
/// ```
#[must_use]
pub fn canonicalize_json(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

/// Lowercase hex SHA-256 of the canonical form of `value`.
#[must_use]
pub fn sha256_canonical(value: &Value) -> String {
    sha256_hex(canonicalize_json(value).as_bytes())
}

/// Lowercase hex SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn push_json_string(s: &str, buf: &mut String) {
    buf.push_str(&serde_json::to_string(s).expect("string serialization cannot fail"));
}

fn write_canonical(value: &Value, buf: &mut String) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => push_json_string(s, buf),
        Value::Array(arr) => {
            buf.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            buf.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                push_json_string(key, buf);
                buf.push(':');
                write_canonical(val, buf);
            }
            buf.push('}');
        }
    }
}
