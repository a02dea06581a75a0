//! # Persistence Interface
//!
//! The narrow set of operations the service needs from a store.
//!
//! Every method is one atomic operation: a caller that has seen a write
//! return `Ok` will observe it on its next read. Nothing here locks across
//! calls, so concurrent writers to the same widget race and the last one wins.

use crate::{User, Widget, WidgetDraft, WidgetsError};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Record counts written by a snapshot export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotStats {
    pub widgets: usize,
    pub users: usize,
}

/// Storage for widget and user records.
pub trait WidgetStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Widgets
    // -------------------------------------------------------------------------

    /// Look up a widget by id.
    fn get_widget(&self, id: u64) -> Result<Option<Widget>, WidgetsError>;

    /// All widgets, ascending by id.
    fn list_widgets(&self) -> Result<Vec<Widget>, WidgetsError>;

    /// Create a widget under the next unused id.
    ///
    /// Ids are never handed out twice, even after the widget holding one is
    /// deleted.
    fn insert_widget(
        &self,
        draft: WidgetDraft,
        last_user: &str,
        now: DateTime<Utc>,
    ) -> Result<Widget, WidgetsError>;

    /// Overwrite an existing widget. Returns `false` if the id is gone.
    fn update_widget(&self, widget: &Widget) -> Result<bool, WidgetsError>;

    /// Delete a widget. Returns `false` if the id did not exist.
    fn delete_widget(&self, id: u64) -> Result<bool, WidgetsError>;

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    /// Look up a user by name.
    fn get_user(&self, name: &str) -> Result<Option<User>, WidgetsError>;

    /// All users, ascending by name.
    fn list_users(&self) -> Result<Vec<User>, WidgetsError>;

    /// Add a user.
    ///
    /// # Errors
    ///
    /// `WidgetsError::UserExists` if the name is taken.
    fn insert_user(&self, user: &User) -> Result<(), WidgetsError>;

    /// Replace a user's record, re-indexing its key.
    ///
    /// # Errors
    ///
    /// `WidgetsError::UserNotFound` if no user has this name.
    fn update_user(&self, user: &User) -> Result<(), WidgetsError>;

    /// Delete a user. Its key stops resolving immediately.
    /// Returns `false` if the user did not exist.
    fn delete_user(&self, name: &str) -> Result<bool, WidgetsError>;

    /// Find the user holding `api_key`.
    fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, WidgetsError>;

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Write a point-in-time copy of the whole store to `path`.
    ///
    /// The copy is a standalone redb database that `RedbStore::open` can
    /// serve directly. `path` must not exist yet.
    fn export_snapshot(&self, path: &Path) -> Result<SnapshotStats, WidgetsError>;
}

/// The handle shared by request handlers and the backup scheduler.
pub type SharedStore = Arc<dyn WidgetStore>;
