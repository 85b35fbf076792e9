//! Masking of credential-like values before they are shown or persisted.

use serde_json::{Map, Value};

const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "token",
    "password",
    "passwd",
    "secret",
    "auth",
    "credential",
];
const SENSITIVE_SEGMENTS: &[&str] = &["ak", "sk"];
const READABLE_KEY_SEGMENTS: &[&str] = &["keyword", "keywords"];

const MASK: &str = "***";
const REVEAL_CHARS: usize = 4;
const MIN_PARTIAL_REVEAL_LEN: usize = 9;

/// Returns true when a field name looks like it holds a credential.
///
/// Matching is case-insensitive. Short markers such as `ak`/`sk` only match
/// as whole name segments (`app_sk`, `accessSk`). `key` must start or end a
/// segment (`api_key`, `apiKey2`, `api_keys`, `privatekey`); `keyword` and
/// `task` stay readable.
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    if SENSITIVE_SUBSTRINGS
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return true;
    }

    key_segments(key).iter().any(|segment| {
        let segment = segment.as_str();
        SENSITIVE_SEGMENTS.contains(&segment)
            || segment.ends_with("key")
            || (segment.starts_with("key") && !READABLE_KEY_SEGMENTS.contains(&segment))
    })
}

/// Splits on punctuation and lower-to-upper camel case boundaries.
fn key_segments(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for ch in key.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// `***` for short secrets, `first4...last4` otherwise.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < MIN_PARTIAL_REVEAL_LEN {
        return MASK.to_string();
    }
    let head: String = chars[..REVEAL_CHARS].iter().collect();
    let tail: String = chars[chars.len() - REVEAL_CHARS..].iter().collect();
    format!("{head}...{tail}")
}

/// Like [`mask_secret`] but reports an absent value as "Not set".
pub fn mask_optional(value: Option<&str>) -> String {
    match value {
        Some(value) if !value.is_empty() => mask_secret(value),
        _ => "Not set".to_string(),
    }
}

/// Returns a copy of `value` with every sensitive field masked, at any depth.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut masked = Map::with_capacity(fields.len());
            for (key, field) in fields {
                let field = if is_sensitive_key(key) {
                    mask_field(field)
                } else {
                    redact(field)
                };
                masked.insert(key.clone(), field);
            }
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn mask_field(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(secret) => Value::String(mask_secret(secret)),
        _ => Value::String(MASK.to_string()),
    }
}
