//! Redaction of sensitive fields before anything is logged.

use serde_json::Value;

/// Replacement for every redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values never reach a log sink (matched ignoring case).
pub const REDACTED_FIELDS: &[&str] = &[
    "password",
    "passwordConfirm",
    "newPassword",
    "currentPassword",
    "token",
    "accessToken",
    "refreshToken",
    "authorization",
    "cookie",
    "set-cookie",
    "api_key",
    "apiKey",
    "secret",
    "csrf",
    "_csrf",
    "ssn",
    "creditCard",
    "cvv",
];

pub fn is_sensitive(key: &str) -> bool {
    REDACTED_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(key))
}

/// Replace sensitive values in place, recursing through objects and arrays.
pub fn redact_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if is_sensitive(key) {
                    *inner = Value::String(REDACTED.to_string());
                } else {
                    redact_in_place(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_in_place),
        _ => {}
    }
}

/// Redacted copy of `value`.
pub fn redact(value: &Value) -> Value {
    let mut copy = value.clone();
    redact_in_place(&mut copy);
    copy
}
