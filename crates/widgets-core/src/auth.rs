//! # Authenticator
//!
//! Resolves the API key presented with a request to the name of the user
//! holding it. Keys never expire; a key stops working only when its user
//! is deleted or its key is rotated.

use crate::store::WidgetStore;
use crate::{Identity, WidgetsError};
use thiserror::Error;

/// Why a request could not be authenticated.
///
/// `MissingKey` and `UnknownKey` look the same to the client; they are
/// separate so the audit log can tell them apart.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("no API key presented")]
    MissingKey,

    #[error("API key does not belong to any user")]
    UnknownKey,

    /// The user store could not be consulted. Not the client's fault.
    #[error(transparent)]
    Store(#[from] WidgetsError),
}

/// Authenticate a request by its API key.
///
/// An absent or empty key fails without touching the store.
pub fn authenticate(store: &dyn WidgetStore, api_key: Option<&str>) -> Result<Identity, AuthFailure> {
    let api_key = match api_key {
        Some(k) if !k.is_empty() => k,
        _ => return Err(AuthFailure::MissingKey),
    };

    match store.find_user_by_api_key(api_key)? {
        Some(user) => Ok(Identity(user.name)),
        None => Err(AuthFailure::UnknownKey),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{MemoryStore, User};

    #[test]
    fn known_key_yields_identity() {
        let store = MemoryStore::new();
        let user = User::new("alice").unwrap();
        store.insert_user(&user).unwrap();

        let identity = authenticate(&store, Some(&user.api_key)).unwrap();
        assert_eq!(identity, Identity("alice".to_string()));
    }

    #[test]
    fn missing_and_empty_keys() {
        let store = MemoryStore::new();
        assert!(matches!(
            authenticate(&store, None),
            Err(AuthFailure::MissingKey)
        ));
        assert!(matches!(
            authenticate(&store, Some("")),
            Err(AuthFailure::MissingKey)
        ));
    }

    #[test]
    fn unknown_key() {
        let store = MemoryStore::new();
        store.insert_user(&User::new("alice").unwrap()).unwrap();
        assert!(matches!(
            authenticate(&store, Some("00000000-0000-0000-0000-000000000000")),
            Err(AuthFailure::UnknownKey)
        ));
    }

    #[test]
    fn deleted_user_key_stops_working() {
        let store = MemoryStore::new();
        let user = User::new("alice").unwrap();
        store.insert_user(&user).unwrap();
        store.delete_user("alice").unwrap();
        assert!(matches!(
            authenticate(&store, Some(&user.api_key)),
            Err(AuthFailure::UnknownKey)
        ));
    }

    #[test]
    fn rotated_key_replaces_old_one() {
        let store = MemoryStore::new();
        let mut user = User::new("alice").unwrap();
        store.insert_user(&user).unwrap();
        let old = user.api_key.clone();
        user.rotate_key();
        store.update_user(&user).unwrap();

        assert!(authenticate(&store, Some(&old)).is_err());
        assert!(authenticate(&store, Some(&user.api_key)).is_ok());
    }
}
