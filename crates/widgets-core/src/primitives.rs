//! # Primitives
//!
//! Fixed limits of the widgets data model.
//!
//! These are compiled into the binary; the stores and the validator both
//! read them so a record can never be persisted in a shape the API would
//! reject.

/// Maximum length of a widget name, in characters.
pub const MAX_WIDGET_NAME_LENGTH: usize = 64;

/// Maximum length of a user name, in characters.
pub const MAX_USER_NAME_LENGTH: usize = 64;

/// Length of an issued API key (a hyphenated UUID).
pub const API_KEY_LENGTH: usize = 36;

/// First id handed out by an empty store.
pub const FIRST_WIDGET_ID: u64 = 1;

/// Returns `true` if `c` may appear in a widget name.
///
/// The allowed set is `[A-Za-z0-9 _-]`.
#[must_use]
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-'
}
