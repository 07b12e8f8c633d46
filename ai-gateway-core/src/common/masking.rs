//! Secret masking.
//!
//! One rule, two presentations. [`mask_secret`] implements the log/error
//! masking rule from the error-handling design: preserve the first and last
//! four characters, anything eight characters or shorter becomes the literal
//! `***REDACTED***`. [`mask_credential_display`] reuses the same
//! preserve-the-edges logic but renders the short case as `***` and the long
//! case with a fixed `...` separator, matching the credentials resolver's
//! display contract.

const REDACTED: &str = "***REDACTED***";
const SHORT_THRESHOLD: usize = 8;

/// Mask a secret-shaped string for inclusion in a log line or error message.
pub fn mask_secret(value: &str) -> String {
    let len = value.chars().count();
    if len <= SHORT_THRESHOLD {
        return REDACTED.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    let middle_len = len - 8;
    format!("{head}{}{tail}", "*".repeat(middle_len.max(1)))
}

/// Mask a credential value for display in admin/debug surfaces
/// (`getMaskedCredentials`). Unset values are rendered as `[NOT SET]`.
pub fn mask_credential_display(value: Option<&str>) -> String {
    match value {
        None => "[NOT SET]".to_string(),
        Some(v) if v.chars().count() <= SHORT_THRESHOLD => "***".to_string(),
        Some(v) => {
            let chars: Vec<char> = v.chars().collect();
            let len = chars.len();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[len - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}

/// Keys whose values should always be treated as secret-shaped when
/// sanitizing a free-form JSON body for logging.
const SECRET_KEY_HINTS: &[&str] = &[
    "api_key",
    "apikey",
    "authorization",
    "auth",
    "secret",
    "token",
    "password",
    "credential",
];

/// Best-effort detection of secret-shaped values in a free-form JSON value,
/// used ahead of logging request/response bodies.
pub fn contains_secrets(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => map.iter().any(|(k, v)| {
            let key_lower = k.to_lowercase();
            if SECRET_KEY_HINTS.iter().any(|hint| key_lower.contains(hint)) {
                return true;
            }
            contains_secrets(v)
        }),
        serde_json::Value::Array(items) => items.iter().any(contains_secrets),
        _ => false,
    }
}

/// Recursively mask values under secret-shaped keys in a JSON value,
/// leaving the rest of the structure untouched. Used before writing a
/// request/response body to logs.
pub fn sanitize_for_logging(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key_lower = k.to_lowercase();
                if SECRET_KEY_HINTS.iter().any(|hint| key_lower.contains(hint)) {
                    if let serde_json::Value::String(s) = v {
                        out.insert(k.clone(), serde_json::Value::String(mask_secret(s)));
                        continue;
                    }
                }
                out.insert(k.clone(), sanitize_for_logging(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_for_logging).collect())
        }
        other => other.clone(),
    }
}

/// Best-effort masking for a raw response body destined for an error
/// message or log line: if the body parses as JSON, secret-shaped values
/// are masked key-by-key (see [`sanitize_for_logging`]); otherwise the body
/// is returned unchanged, since a non-JSON body has no structure to find
/// secret-shaped fields in.
pub fn sanitize_body_text(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) if contains_secrets(&value) => sanitize_for_logging(&value).to_string(),
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_preserves_first_and_last_four() {
        let secret = "sk-abcdefghijklmnopqrstuvwxyz1234567890abcdef";
        let masked = mask_secret(secret);
        assert!(masked.starts_with("sk-a"));
        assert!(masked.ends_with("cdef"));
        assert!(masked.contains('*'));
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn short_values_fully_redacted() {
        assert_eq!(mask_secret("short"), "***REDACTED***");
        assert_eq!(mask_secret("12345678"), "***REDACTED***");
    }

    #[test]
    fn credential_display_formats() {
        assert_eq!(mask_credential_display(None), "[NOT SET]");
        assert_eq!(mask_credential_display(Some("abc")), "***");
        assert_eq!(
            mask_credential_display(Some("sk-abcdefghijklmnop")),
            "sk-a...mnop"
        );
    }

    #[test]
    fn detects_and_sanitizes_nested_secrets() {
        let body = serde_json::json!({
            "api_key": "sk-abcdefghijklmnopqrstuvwxyz1234567890abcdef",
            "nested": { "authorization": "Bearer abcdefghijklmnop" },
            "prompt": "hello world",
        });
        assert!(contains_secrets(&body));
        let sanitized = sanitize_for_logging(&body);
        let raw = sanitized.to_string();
        assert!(!raw.contains("abcdefghijklmnopqrstuvwxyz1234567890abcdef"));
        assert!(raw.contains("hello world"));
    }

    #[test]
    fn sanitize_body_text_masks_json_error_bodies() {
        let body = r#"{"error":"bad request","api_key":"sk-abcdefghijklmnopqrstuvwxyz1234567890abcdef"}"#;
        let sanitized = sanitize_body_text(body);
        assert!(!sanitized.contains("abcdefghijklmnopqrstuvwxyz1234567890abcdef"));
        assert!(sanitized.contains("bad request"));
    }

    #[test]
    fn sanitize_body_text_passes_through_non_json() {
        let body = "plain text failure, no secrets here";
        assert_eq!(sanitize_body_text(body), body);
    }
}
