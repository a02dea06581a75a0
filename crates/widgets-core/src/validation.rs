//! # Widget Payload Validation
//!
//! Checks a raw request body against the widget field grammar.
//!
//! A body is valid when it is a JSON object with exactly the keys `name`
//! and `parts`, where:
//! - `name` is a string of at most `MAX_WIDGET_NAME_LENGTH` characters
//!   drawn from `[A-Za-z0-9 _-]` (the empty string is allowed)
//! - `parts` is a non-negative JSON integer (not a float, string or bool)
//!
//! Checks run in order key set → name → parts and the first failure wins.
//! The same grammar applies to both create (POST) and replace (PUT).

use crate::WidgetDraft;
use crate::primitives::{MAX_WIDGET_NAME_LENGTH, is_name_char};
use serde_json::Value;
use std::fmt;

/// Outcome of validating a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The body is a well-formed widget payload.
    Valid(WidgetDraft),
    /// The body is not parseable JSON. Carries the parser message.
    MalformedPayload(String),
    /// The body parses but breaks the field grammar.
    SchemaViolation(SchemaViolation),
}

/// Which part of the grammar a parsed body broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaViolation {
    /// Not an object, or the key set is not exactly `{name, parts}`.
    KeySet,
    /// `name` is not a string, too long, or has a disallowed character.
    Name,
    /// `parts` is not a non-negative integer.
    Parts,
}

impl SchemaViolation {
    /// Human-readable reason sent back to the client.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::KeySet => {
                "The JSON provided does not contain the correct keys for the requested operation."
            }
            Self::Name => {
                "The widget 'name' should be a string of 64 characters or less using only letters, digits, spaces, '_' or '-'."
            }
            Self::Parts => "The widget 'parts' should be a non-negative integer.",
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Reason sent back for a body that is not JSON.
pub const MALFORMED_REASON: &str = "The data provided is not valid JSON.";

/// Validate a raw request body.
pub fn validate(raw: &[u8]) -> Validation {
    let document: Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(e) => return Validation::MalformedPayload(e.to_string()),
    };

    let Value::Object(fields) = document else {
        return Validation::SchemaViolation(SchemaViolation::KeySet);
    };

    if fields.len() != 2 || !fields.contains_key("name") || !fields.contains_key("parts") {
        return Validation::SchemaViolation(SchemaViolation::KeySet);
    }

    let name = match fields.get("name") {
        Some(Value::String(s)) if validate_name(s) => s.clone(),
        _ => return Validation::SchemaViolation(SchemaViolation::Name),
    };

    // `as_u64` is `None` for negatives and for anything parsed as a float.
    let parts = match fields.get("parts") {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(p) => p,
            None => return Validation::SchemaViolation(SchemaViolation::Parts),
        },
        _ => return Validation::SchemaViolation(SchemaViolation::Parts),
    };

    Validation::Valid(WidgetDraft { name, parts })
}

/// Returns `true` if `name` satisfies the widget name grammar.
#[must_use]
pub fn validate_name(name: &str) -> bool {
    name.chars().count() <= MAX_WIDGET_NAME_LENGTH && name.chars().all(is_name_char)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn check(body: &str) -> Validation {
        validate(body.as_bytes())
    }

    #[test]
    fn accepts_valid_payload() {
        assert_eq!(
            check(r#"{"name": "Gear box-1_a", "parts": 12}"#),
            Validation::Valid(WidgetDraft::new("Gear box-1_a", 12))
        );
    }

    #[test]
    fn empty_name_is_valid() {
        assert_eq!(
            check(r#"{"name": "", "parts": 0}"#),
            Validation::Valid(WidgetDraft::new("", 0))
        );
    }

    #[test]
    fn name_length_boundary() {
        let ok = format!(r#"{{"name": "{}", "parts": 1}}"#, "a".repeat(64));
        let long = format!(r#"{{"name": "{}", "parts": 1}}"#, "a".repeat(65));
        assert!(matches!(check(&ok), Validation::Valid(_)));
        assert_eq!(
            check(&long),
            Validation::SchemaViolation(SchemaViolation::Name)
        );
    }

    #[test]
    fn rejects_disallowed_name_characters() {
        for name in ["bad!name", "dot.name", "tab\\tname", "caf\\u00e9"] {
            let body = format!(r#"{{"name": "{name}", "parts": 1}}"#);
            assert_eq!(
                check(&body),
                Validation::SchemaViolation(SchemaViolation::Name),
                "{name}"
            );
        }
    }

    #[test]
    fn rejects_non_string_name() {
        assert_eq!(
            check(r#"{"name": 5, "parts": 1}"#),
            Validation::SchemaViolation(SchemaViolation::Name)
        );
        assert_eq!(
            check(r#"{"name": null, "parts": 1}"#),
            Validation::SchemaViolation(SchemaViolation::Name)
        );
    }

    #[test]
    fn rejects_bad_parts() {
        for parts in ["-1", "\"5\"", "3.5", "3.0", "true", "null", "[1]"] {
            let body = format!(r#"{{"name": "ok", "parts": {parts}}}"#);
            assert_eq!(
                check(&body),
                Validation::SchemaViolation(SchemaViolation::Parts),
                "{parts}"
            );
        }
    }

    #[test]
    fn key_set_must_be_exact() {
        assert_eq!(
            check(r#"{"name": "ok", "parts": 1, "extra": true}"#),
            Validation::SchemaViolation(SchemaViolation::KeySet)
        );
        assert_eq!(
            check(r#"{"name": "ok"}"#),
            Validation::SchemaViolation(SchemaViolation::KeySet)
        );
        assert_eq!(
            check(r#"{}"#),
            Validation::SchemaViolation(SchemaViolation::KeySet)
        );
    }

    #[test]
    fn key_set_checked_before_fields() {
        // Both fields are bad, but the extra key is reported.
        assert_eq!(
            check(r#"{"name": "bad!", "parts": -1, "x": 0}"#),
            Validation::SchemaViolation(SchemaViolation::KeySet)
        );
        // Name is checked before parts.
        assert_eq!(
            check(r#"{"name": "bad!", "parts": -1}"#),
            Validation::SchemaViolation(SchemaViolation::Name)
        );
    }

    #[test]
    fn non_object_documents_violate_key_set() {
        for body in ["[]", "\"name\"", "42", "null"] {
            assert_eq!(
                check(body),
                Validation::SchemaViolation(SchemaViolation::KeySet),
                "{body}"
            );
        }
    }

    #[test]
    fn malformed_json() {
        for body in ["", "not json", r#"{"name": "ok", "parts": 1"#, "\u{0}"] {
            assert!(
                matches!(check(body), Validation::MalformedPayload(_)),
                "{body:?}"
            );
        }
        assert!(matches!(
            validate(&[0xff, 0xfe, 0x00]),
            Validation::MalformedPayload(_)
        ));
    }

    #[test]
    fn large_parts_accepted() {
        let body = format!(r#"{{"name": "big", "parts": {}}}"#, u64::MAX);
        assert_eq!(
            check(&body),
            Validation::Valid(WidgetDraft::new("big", u64::MAX))
        );
    }
}
