//! # In-Memory Widget Storage
//!
//! A volatile store for tests and throwaway servers. Records live in
//! `BTreeMap`s behind a single `RwLock`, so each operation is atomic and
//! listing order is by id (widgets) or name (users).

use crate::primitives::FIRST_WIDGET_ID;
use crate::storage::redb_store::write_snapshot;
use crate::store::{SnapshotStats, WidgetStore};
use crate::{User, Widget, WidgetDraft, WidgetsError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use subtle::ConstantTimeEq;

#[derive(Debug)]
struct Tables {
    widgets: BTreeMap<u64, Widget>,
    users: BTreeMap<String, User>,
    next_widget_id: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            widgets: BTreeMap::new(),
            users: BTreeMap::new(),
            next_widget_id: FIRST_WIDGET_ID,
        }
    }
}

/// A volatile widget store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, WidgetsError> {
        self.tables
            .read()
            .map_err(|_| WidgetsError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, WidgetsError> {
        self.tables
            .write()
            .map_err(|_| WidgetsError::Storage("memory store lock poisoned".to_string()))
    }
}

/// Compare two keys without an early exit on the first differing byte.
fn keys_match(provided: &str, stored: &str) -> bool {
    provided.len() == stored.len() && bool::from(provided.as_bytes().ct_eq(stored.as_bytes()))
}

impl WidgetStore for MemoryStore {
    fn get_widget(&self, id: u64) -> Result<Option<Widget>, WidgetsError> {
        Ok(self.read()?.widgets.get(&id).cloned())
    }

    fn list_widgets(&self) -> Result<Vec<Widget>, WidgetsError> {
        Ok(self.read()?.widgets.values().cloned().collect())
    }

    fn insert_widget(
        &self,
        draft: WidgetDraft,
        last_user: &str,
        now: DateTime<Utc>,
    ) -> Result<Widget, WidgetsError> {
        let mut tables = self.write()?;
        let id = tables.next_widget_id;
        tables.next_widget_id = id
            .checked_add(1)
            .ok_or_else(|| WidgetsError::Storage("Widget id space exhausted".to_string()))?;

        let widget = Widget::create(id, draft, last_user, now);
        tables.widgets.insert(id, widget.clone());
        Ok(widget)
    }

    fn update_widget(&self, widget: &Widget) -> Result<bool, WidgetsError> {
        let mut tables = self.write()?;
        match tables.widgets.get_mut(&widget.id) {
            Some(slot) => {
                *slot = widget.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_widget(&self, id: u64) -> Result<bool, WidgetsError> {
        Ok(self.write()?.widgets.remove(&id).is_some())
    }

    fn get_user(&self, name: &str) -> Result<Option<User>, WidgetsError> {
        Ok(self.read()?.users.get(name).cloned())
    }

    fn list_users(&self) -> Result<Vec<User>, WidgetsError> {
        Ok(self.read()?.users.values().cloned().collect())
    }

    fn insert_user(&self, user: &User) -> Result<(), WidgetsError> {
        let mut tables = self.write()?;
        if tables.users.contains_key(&user.name) {
            return Err(WidgetsError::UserExists(user.name.clone()));
        }
        if tables
            .users
            .values()
            .any(|u| keys_match(&user.api_key, &u.api_key))
        {
            return Err(WidgetsError::Storage("API key already issued".to_string()));
        }
        tables.users.insert(user.name.clone(), user.clone());
        Ok(())
    }

    fn update_user(&self, user: &User) -> Result<(), WidgetsError> {
        let mut tables = self.write()?;
        if tables
            .users
            .values()
            .any(|u| u.name != user.name && keys_match(&user.api_key, &u.api_key))
        {
            return Err(WidgetsError::Storage("API key already issued".to_string()));
        }
        match tables.users.get_mut(&user.name) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(WidgetsError::UserNotFound(user.name.clone())),
        }
    }

    fn delete_user(&self, name: &str) -> Result<bool, WidgetsError> {
        Ok(self.write()?.users.remove(name).is_some())
    }

    fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, WidgetsError> {
        let tables = self.read()?;
        // Scan every user so lookup time does not depend on where the key sits.
        let mut found = None;
        for user in tables.users.values() {
            if keys_match(api_key, &user.api_key) {
                found = Some(user.clone());
            }
        }
        Ok(found)
    }

    fn export_snapshot(&self, path: &Path) -> Result<SnapshotStats, WidgetsError> {
        let (widgets, users, next_id) = {
            let tables = self.read()?;
            (
                tables.widgets.values().cloned().collect::<Vec<_>>(),
                tables.users.values().cloned().collect::<Vec<_>>(),
                tables.next_widget_id,
            )
        };
        write_snapshot(path, &widgets, &users, next_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
