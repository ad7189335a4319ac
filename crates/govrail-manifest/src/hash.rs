//! Canonical serialization and hash-chain computation for manifests.
//!
//! `hash_self` is SHA-256 over the manifest's canonical bytes with the
//! `hash_self` field itself omitted. Canonical means: compact JSON with
//! object keys sorted lexicographically, recursively.

use govrail_types::Manifest;
use serde_json::Value;
use sha2::{Digest, Sha256};

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Computes `hash_self` for a manifest, ignoring whatever is currently in
/// its `hash_self` field.
pub fn compute_hash_self(manifest: &Manifest) -> String {
    let mut value = serde_json::to_value(manifest).expect("manifest is always serializable");
    if let Value::Object(map) = &mut value {
        map.remove("hash_self");
    }
    let canonical = canonicalize(&value);
    let bytes = serde_json::to_vec(&canonical).expect("canonical value is always serializable");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Tiny inline hex encoder so the crate does not need the `hex` crate for
/// a single call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}
