//! Canonical encoding of JSON values for URL paths and query strings.
//!
//! The encoders here only produce unescaped text; percent-encoding happens
//! when the URL builder writes the pieces into a [`url::Url`].

use serde_json::Value;

use crate::options::QueryOptions;

/// Turns item keys and option bags into URL-ready text.
pub trait ValueEncoder: Send + Sync {
    /// Text form of an item key, used as one path segment.
    fn encode_key(&self, key: &Value) -> String;

    /// Flattened `(name, value)` query pairs, in a deterministic order.
    fn encode_query(&self, options: &QueryOptions) -> Vec<(String, String)>;
}

/// `qs`-style encoder: nested objects and arrays flatten into bracketed
/// names (`range[start]=a`, `ids[0]=x`), `null` becomes an empty value.
#[derive(Debug, Clone, Copy, Default)]
pub struct QsEncoder;

impl ValueEncoder for QsEncoder {
    fn encode_key(&self, key: &Value) -> String {
        match key {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            // Number, Bool, and composite keys use their compact JSON text.
            // Object keys are sorted, so the text is canonical.
            other => other.to_string(),
        }
    }

    fn encode_query(&self, options: &QueryOptions) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(options.len());
        for (name, value) in options {
            flatten(name.clone(), value, &mut pairs);
        }
        pairs
    }
}

fn flatten(name: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => out.push((name, String::new())),
        Value::String(s) => out.push((name, s.clone())),
        Value::Bool(_) | Value::Number(_) => out.push((name, value.to_string())),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten(format!("{name}[{index}]"), item, out);
            }
        }
        Value::Object(fields) => {
            for (field, item) in fields {
                flatten(format!("{name}[{field}]"), item, out);
            }
        }
    }
}
