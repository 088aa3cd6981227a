use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Serializes `value` to JSON with object keys sorted byte-lexicographically at every nesting
/// depth, independent of source attribute order or map insertion order.
///
/// This is the canonical form hashed by [`record_hash`]. It is written by hand rather than
/// relying on `serde_json`'s own object ordering so the result is stable even if some future
/// dependency in the workspace enables `serde_json`'s `preserve_order` feature.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars have no internal ordering ambiguity; serde_json's own serialization is canonical.
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    // serde_json::to_string on a &str always produces a valid, minimal-escaped JSON string.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

/// Computes the hex-encoded SHA-256 digest of the record body's canonical JSON form.
///
/// Stable across runs, worker threads, and operating systems for any given `value`
/// (Testable Property: hash determinism).
pub fn record_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
