//! Scrubs sensitive values before anything is stored or broadcast.

use serde_json::Value;
use std::collections::HashMap;

pub const REDACTION_MARKER: &str = "***redacted***";

/// Case-insensitive header deny-list.
const SENSITIVE_HEADERS: [&str; 5] = [
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "set-cookie",
];

/// Case-sensitive JSON key deny-list.
const SENSITIVE_KEYS: [&str; 7] = [
    "password",
    "token",
    "secret",
    "apiKey",
    "access_token",
    "id_token",
    "authorization",
];

pub fn redact_headers<'a, I>(headers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(key, value)| {
            let redacted = SENSITIVE_HEADERS
                .iter()
                .any(|denied| key.eq_ignore_ascii_case(denied));
            let value = if redacted {
                REDACTION_MARKER.to_string()
            } else {
                value.to_string()
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Recursive walk over arbitrarily nested objects/arrays. Values under a
/// denied key are replaced wholesale; leaves pass through unchanged.
/// `serde_json::Value` is acyclic and the input is size-capped upstream, so
/// termination holds by construction.
pub fn redact_json(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| {
                    if SENSITIVE_KEYS.contains(&key.as_str()) {
                        (key, Value::String(REDACTION_MARKER.to_string()))
                    } else {
                        (key, redact_json(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_json).collect()),
        leaf => leaf,
    }
}
