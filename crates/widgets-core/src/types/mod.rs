//! # Core Types
//!
//! Record definitions for the widgets service.
//!
//! This module provides:
//! - `Widget` - the managed resource
//! - `WidgetDraft` - a validated `{name, parts}` payload
//! - `User` - an API key holder
//! - `Identity` - the authenticated user name of one request
//! - Error types (`WidgetsError`)
//!
//! The same `Serialize` impls drive both the HTTP representation
//! (`serde_json`) and the stored representation (`postcard`).

use crate::primitives::{API_KEY_LENGTH, MAX_USER_NAME_LENGTH};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// WIDGET
// =============================================================================

/// A named record with a part count and ownership metadata.
///
/// Invariant: `created_date <= updated_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    /// Server-assigned, never reused.
    pub id: u64,
    pub name: String,
    pub parts: u64,
    /// Name of the user who last wrote this widget, as it was at write time.
    pub last_user: String,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl Widget {
    /// Build a freshly created widget. Both timestamps are `now`.
    #[must_use]
    pub fn create(id: u64, draft: WidgetDraft, last_user: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            parts: draft.parts,
            last_user: last_user.to_string(),
            created_date: now,
            updated_date: now,
        }
    }

    /// Overwrite the mutable fields from a PUT.
    ///
    /// `id` and `created_date` are left alone. `updated_date` always moves
    /// forward, even when the clock has not.
    pub fn apply_update(&mut self, draft: WidgetDraft, last_user: &str, now: DateTime<Utc>) {
        self.name = draft.name;
        self.parts = draft.parts;
        self.last_user = last_user.to_string();
        self.updated_date = if now > self.updated_date {
            now
        } else {
            self.updated_date + Duration::microseconds(1)
        };
    }
}

/// A payload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetDraft {
    pub name: String,
    pub parts: u64,
}

impl WidgetDraft {
    /// Create a new draft. No validation happens here; see `validation::validate`.
    #[must_use]
    pub fn new(name: impl Into<String>, parts: u64) -> Self {
        Self {
            name: name.into(),
            parts,
        }
    }
}

// =============================================================================
// USER
// =============================================================================

/// An API key holder.
///
/// One key per user. The key is a hyphenated UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub api_key: String,
}

impl User {
    /// Create a user with a freshly issued key.
    ///
    /// # Errors
    ///
    /// Returns `WidgetsError::InvalidUserName` if the name is empty, longer
    /// than `MAX_USER_NAME_LENGTH` characters, or contains control characters.
    pub fn new(name: impl Into<String>) -> Result<Self, WidgetsError> {
        let name = name.into();
        check_user_name(&name)?;
        Ok(Self {
            name,
            api_key: issue_api_key(),
        })
    }

    /// Replace the key with a freshly issued one.
    pub fn rotate_key(&mut self) {
        self.api_key = issue_api_key();
    }
}

/// Issue a new opaque API key.
fn issue_api_key() -> String {
    let key = Uuid::new_v4().hyphenated().to_string();
    debug_assert_eq!(key.len(), API_KEY_LENGTH);
    key
}

fn check_user_name(name: &str) -> Result<(), WidgetsError> {
    if name.trim().is_empty() {
        return Err(WidgetsError::InvalidUserName(
            "user name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_USER_NAME_LENGTH {
        return Err(WidgetsError::InvalidUserName(format!(
            "user name must be at most {} characters",
            MAX_USER_NAME_LENGTH
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(WidgetsError::InvalidUserName(
            "user name must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// IDENTITY
// =============================================================================

/// The authenticated user name attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(pub String);

impl Identity {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the widgets core.
///
/// Validation outcomes are not errors; they are returned as
/// `validation::Validation` values.
///
/// Serializable so the admin channel can hand a failure back to the CLI
/// with its kind intact.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum WidgetsError {
    /// The storage engine failed (open, transaction, table access).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A user with this name already exists.
    #[error("User already exists: {0}")]
    UserExists(String),

    /// No user with this name exists.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The user name breaks the naming rules.
    #[error("Invalid user name: {0}")]
    InvalidUserName(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

// =============================================================================
// TESTS
// =============================================================================
