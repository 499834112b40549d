//! Cache key derivation.
//!
//! Every key is a SHA-256 digest over length-prefixed fields, namespaced by
//! tier, so two different field splits can never collide.
//!
//! Variable values enter keys in canonical JSON (object keys sorted,
//! no whitespace): the same variables sent with a different key order hash
//! the same, a different value hashes differently.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::OperationKey;

/// Incremental key builder.
pub struct KeyBuilder {
    hasher: Sha256,
}

impl KeyBuilder {
    pub fn new(namespace: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.write(namespace.as_bytes());
        builder
    }

    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
    }

    pub fn field(mut self, value: impl AsRef<[u8]>) -> Self {
        self.write(value.as_ref());
        self
    }

    /// Absent and empty are different values.
    pub fn optional(mut self, value: Option<&str>) -> Self {
        match value {
            Some(v) => {
                self.hasher.update([1u8]);
                self.write(v.as_bytes());
            }
            None => self.hasher.update([0u8]),
        }
        self
    }

    pub fn json(self, value: &Value) -> Self {
        let canonical = canonical_json(value);
        self.field(canonical)
    }

    pub fn finish(self) -> OperationKey {
        OperationKey(self.hasher.finalize().into())
    }
}

/// Serialize `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Subset of `variables` named in `names`, missing ones as `null`.
pub fn select_variables(variables: &Value, names: &[String]) -> Value {
    let selected: serde_json::Map<String, Value> = names
        .iter()
        .map(|name| {
            let value = variables.get(name).cloned().unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect();
    Value::Object(selected)
}

/// Boolean-valued variables only. Persisted operations are keyed on these
/// before the document is known, since only booleans drive `@skip`/`@include`.
pub fn boolean_variables(variables: &Value) -> Value {
    let selected: serde_json::Map<String, Value> = variables
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(_, v)| v.is_boolean())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    Value::Object(selected)
}

pub fn parse_key(document: &str, operation_name: Option<&str>) -> OperationKey {
    KeyBuilder::new("parse")
        .field(document)
        .optional(operation_name)
        .finish()
}

/// Document, operation name and the values of the variables that drive
/// `@skip`/`@include`.
pub fn normalization_key(
    document: &str,
    operation_name: Option<&str>,
    skip_include_variables: &Value,
) -> OperationKey {
    KeyBuilder::new("normalization")
        .field(document)
        .optional(operation_name)
        .json(skip_include_variables)
        .finish()
}

pub fn validation_key(normalized_hash: &OperationKey) -> OperationKey {
    KeyBuilder::new("validation").field(normalized_hash.0).finish()
}

pub fn plan_key(normalized_hash: &OperationKey) -> OperationKey {
    KeyBuilder::new("plan").field(normalized_hash.0).finish()
}

pub fn persisted_key(
    client_name: &str,
    sha256: &str,
    operation_name: Option<&str>,
    boolean_variables: &Value,
) -> OperationKey {
    KeyBuilder::new("persisted")
        .field(client_name)
        .field(sha256.to_ascii_lowercase())
        .optional(operation_name)
        .json(boolean_variables)
        .finish()
}

/// Content hash of a normalized document.
pub fn document_hash(normalized: &str) -> OperationKey {
    KeyBuilder::new("document").field(normalized).finish()
}

/// Hex SHA-256 of a raw document, as clients send it for persisted operations.
pub fn sha256_hex(document: &str) -> String {
    hex::encode(Sha256::digest(document.as_bytes()))
}
