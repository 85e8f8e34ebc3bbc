//! Redaction of credentials in structured log fields.
//!
//! Session code logs a lot of context around tokens. Anything whose key names
//! a credential, and any value shaped like a bearer header or JWT, is replaced
//! before it reaches a sink.

use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

const DENYLIST_KEYS: &[&str] = &[
    "token",
    "authorization",
    "password",
    "secret",
    "apikey",
    "api_key",
    "cookie",
];

const MAX_STRING_LEN: usize = 512;

/// Keys that survive [`crate::ObservabilityMode::ProdMetadataOnly`].
const METADATA_KEYS: &[&str] = &[
    "event_code",
    "status",
    "phase",
    "step",
    "attempt",
    "waiters",
    "path",
    "event",
];

/// Sanitize every field of a log entry.
pub fn sanitize_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), sanitize_value(k, v)))
        .collect()
}

/// Keep only metadata fields (numbers, bools, and allowlisted keys).
pub fn metadata_only(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(k, v)| {
            !matches!(v, Value::String(_) | Value::Object(_) | Value::Array(_))
                || METADATA_KEYS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.clone(), sanitize_value(k, v)))
        .collect()
}

/// Sanitize a single value, recursing into objects and arrays.
pub fn sanitize_value(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        return Value::String(REDACTED.to_string());
    }

    match value {
        Value::String(s) => sanitize_string(s),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), sanitize_value(k, v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_value(key, item))
                .collect::<Vec<_>>(),
        ),
        _ => value.clone(),
    }
}

/// Redact a free-form string such as a log message.
pub fn sanitize_message(message: &str) -> String {
    message
        .split(' ')
        .map(|word| {
            if looks_like_jwt(word) {
                REDACTED
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize_string(raw: &str) -> Value {
    if looks_like_sensitive_value(raw) {
        return Value::String(REDACTED.to_string());
    }
    if raw.len() > MAX_STRING_LEN {
        let mut end = MAX_STRING_LEN;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        return Value::String(format!("{}...[TRUNCATED len={}]", &raw[..end], raw.len()));
    }
    Value::String(raw.to_string())
}

fn looks_like_sensitive_value(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("bearer ") {
        return true;
    }
    looks_like_jwt(raw) || is_long_base64(raw)
}

fn looks_like_jwt(raw: &str) -> bool {
    raw.matches('.').count() == 2
        && raw.len() > 40
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    DENYLIST_KEYS.iter().any(|entry| lower.contains(entry))
}

fn is_long_base64(value: &str) -> bool {
    value.len() > 48
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=' || c == '_')
}
