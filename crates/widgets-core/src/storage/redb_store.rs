//! # redb-backed Widget Storage
//!
//! A disk-backed store using the redb embedded database, providing:
//! - ACID transactions (one per store operation)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (snapshots read while writers continue)
//! - Zero configuration
//!
//! ## Tables
//!
//! Records are `postcard` bytes. The API key table is an index from key to
//! user name, kept in step with the user table inside the same transaction.
//!
//! ## Snapshots
//!
//! `export_snapshot` copies every table through a single read transaction
//! into a new database file with the same layout, so a backup is restored
//! simply by opening it. The file is built under a hidden `.<name>.partial`
//! sibling and renamed into place only after its commit succeeds.

use crate::primitives::FIRST_WIDGET_ID;
use crate::store::{SnapshotStats, WidgetStore};
use crate::{User, Widget, WidgetDraft, WidgetsError};
use chrono::{DateTime, Utc};
use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition};
use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Table for widgets: id(u64) -> serialized Widget bytes
const WIDGETS: TableDefinition<u64, &[u8]> = TableDefinition::new("widgets");

/// Table for users: name -> serialized User bytes
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Table for the key index: api_key -> user name
const API_KEYS: TableDefinition<&str, &str> = TableDefinition::new("api_keys");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Metadata key holding the next widget id to hand out.
const NEXT_WIDGET_ID: &str = "next_widget_id";

#[inline]
fn storage_err(e: impl Display) -> WidgetsError {
    WidgetsError::Storage(e.to_string())
}

fn encode<T: serde::Serialize>(record: &T) -> Result<Vec<u8>, WidgetsError> {
    postcard::to_allocvec(record).map_err(|e| WidgetsError::Serialization(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, WidgetsError> {
    postcard::from_bytes(bytes).map_err(|e| WidgetsError::Deserialization(e.to_string()))
}

/// A disk-backed widget store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    ///
    /// Opening a snapshot file produced by `export_snapshot` restores it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WidgetsError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            write_txn.open_table(WIDGETS).map_err(storage_err)?;
            write_txn.open_table(USERS).map_err(storage_err)?;
            write_txn.open_table(API_KEYS).map_err(storage_err)?;
            write_txn.open_table(METADATA).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }

    /// The id the next insert will receive.
    pub fn next_widget_id(&self) -> Result<u64, WidgetsError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        read_next_id(&read_txn)
    }
}

fn read_next_id(txn: &ReadTransaction) -> Result<u64, WidgetsError> {
    let table = txn.open_table(METADATA).map_err(storage_err)?;
    Ok(table
        .get(NEXT_WIDGET_ID)
        .map_err(storage_err)?
        .map(|v| v.value())
        .unwrap_or(FIRST_WIDGET_ID))
}

fn read_widgets(txn: &ReadTransaction) -> Result<Vec<Widget>, WidgetsError> {
    let table = txn.open_table(WIDGETS).map_err(storage_err)?;
    let mut widgets = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (_, value) = entry.map_err(storage_err)?;
        widgets.push(decode(value.value())?);
    }
    Ok(widgets)
}

fn read_users(txn: &ReadTransaction) -> Result<Vec<User>, WidgetsError> {
    let table = txn.open_table(USERS).map_err(storage_err)?;
    let mut users = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (_, value) = entry.map_err(storage_err)?;
        users.push(decode(value.value())?);
    }
    Ok(users)
}

/// Write a complete store image into a new database at `path`.
///
/// Shared by every `WidgetStore` so all backups have one format. `path`
/// only ever appears holding a fully committed image.
pub(crate) fn write_snapshot(
    path: &Path,
    widgets: &[Widget],
    users: &[User],
    next_widget_id: u64,
) -> Result<SnapshotStats, WidgetsError> {
    publish_file(path, |staging| {
        fill_snapshot(staging, widgets, users, next_widget_id)
    })
}

/// Hidden sibling of `path` that a snapshot is built under.
fn staging_path(path: &Path) -> Result<PathBuf, WidgetsError> {
    let name = path.file_name().ok_or_else(|| {
        WidgetsError::Io(format!(
            "Snapshot target '{}' has no file name",
            path.display()
        ))
    })?;
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(".partial");
    Ok(path.with_file_name(staged))
}

/// Run `build` against a staging file, then rename it to `path`.
///
/// On any failure the staging file is removed and `path` is left absent.
fn publish_file<T>(
    path: &Path,
    build: impl FnOnce(&Path) -> Result<T, WidgetsError>,
) -> Result<T, WidgetsError> {
    if path.exists() {
        return Err(WidgetsError::Io(format!(
            "Snapshot target '{}' already exists",
            path.display()
        )));
    }

    let staging = staging_path(path)?;
    // Left behind by a process that died mid-export.
    if staging.exists() {
        std::fs::remove_file(&staging).map_err(|e| {
            WidgetsError::Io(format!(
                "Cannot remove stale '{}': {}",
                staging.display(),
                e
            ))
        })?;
    }

    let built = build(&staging).and_then(|value| {
        std::fs::rename(&staging, path)
            .map(|()| value)
            .map_err(|e| {
                WidgetsError::Io(format!(
                    "Cannot move snapshot into '{}': {}",
                    path.display(),
                    e
                ))
            })
    });
    if built.is_err() && staging.exists() {
        // The build error is the one worth reporting.
        let _ = std::fs::remove_file(&staging);
    }
    built
}

/// Create a database at `staging` holding exactly these records.
///
/// The database is closed when this returns.
fn fill_snapshot(
    staging: &Path,
    widgets: &[Widget],
    users: &[User],
    next_widget_id: u64,
) -> Result<SnapshotStats, WidgetsError> {
    let target = RedbStore::open(staging)?;
    let write_txn = target.db.begin_write().map_err(storage_err)?;
    {
        let mut widget_table = write_txn.open_table(WIDGETS).map_err(storage_err)?;
        for widget in widgets {
            let bytes = encode(widget)?;
            widget_table
                .insert(widget.id, bytes.as_slice())
                .map_err(storage_err)?;
        }

        let mut user_table = write_txn.open_table(USERS).map_err(storage_err)?;
        let mut key_table = write_txn.open_table(API_KEYS).map_err(storage_err)?;
        for user in users {
            let bytes = encode(user)?;
            user_table
                .insert(user.name.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
            key_table
                .insert(user.api_key.as_str(), user.name.as_str())
                .map_err(storage_err)?;
        }

        let mut meta_table = write_txn.open_table(METADATA).map_err(storage_err)?;
        meta_table
            .insert(NEXT_WIDGET_ID, next_widget_id)
            .map_err(storage_err)?;
    }
    write_txn.commit().map_err(storage_err)?;

    Ok(SnapshotStats {
        widgets: widgets.len(),
        users: users.len(),
    })
}

impl WidgetStore for RedbStore {
    fn get_widget(&self, id: u64) -> Result<Option<Widget>, WidgetsError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(WIDGETS).map_err(storage_err)?;
        table
            .get(id)
            .map_err(storage_err)?
            .map(|data| decode(data.value()))
            .transpose()
    }

    fn list_widgets(&self) -> Result<Vec<Widget>, WidgetsError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        read_widgets(&read_txn)
    }

    fn insert_widget(
        &self,
        draft: WidgetDraft,
        last_user: &str,
        now: DateTime<Utc>,
    ) -> Result<Widget, WidgetsError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let widget = {
            let mut meta_table = write_txn.open_table(METADATA).map_err(storage_err)?;
            let id = meta_table
                .get(NEXT_WIDGET_ID)
                .map_err(storage_err)?
                .map(|v| v.value())
                .unwrap_or(FIRST_WIDGET_ID);
            let next = id
                .checked_add(1)
                .ok_or_else(|| WidgetsError::Storage("Widget id space exhausted".to_string()))?;

            let widget = Widget::create(id, draft, last_user, now);
            let bytes = encode(&widget)?;

            let mut widget_table = write_txn.open_table(WIDGETS).map_err(storage_err)?;
            widget_table
                .insert(id, bytes.as_slice())
                .map_err(storage_err)?;
            meta_table
                .insert(NEXT_WIDGET_ID, next)
                .map_err(storage_err)?;
            widget
        };
        write_txn.commit().map_err(storage_err)?;
        Ok(widget)
    }

    fn update_widget(&self, widget: &Widget) -> Result<bool, WidgetsError> {
        let bytes = encode(widget)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(WIDGETS).map_err(storage_err)?;
            if table.get(widget.id).map_err(storage_err)?.is_none() {
                drop(table);
                write_txn.abort().map_err(storage_err)?;
                return Ok(false);
            }
            table
                .insert(widget.id, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(true)
    }

    fn delete_widget(&self, id: u64) -> Result<bool, WidgetsError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let removed = {
            let mut table = write_txn.open_table(WIDGETS).map_err(storage_err)?;
            table.remove(id).map_err(storage_err)?.is_some()
        };
        write_txn.commit().map_err(storage_err)?;
        Ok(removed)
    }

    fn get_user(&self, name: &str) -> Result<Option<User>, WidgetsError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(USERS).map_err(storage_err)?;
        table
            .get(name)
            .map_err(storage_err)?
            .map(|data| decode(data.value()))
            .transpose()
    }

    fn list_users(&self) -> Result<Vec<User>, WidgetsError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        read_users(&read_txn)
    }

    fn insert_user(&self, user: &User) -> Result<(), WidgetsError> {
        let bytes = encode(user)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut user_table = write_txn.open_table(USERS).map_err(storage_err)?;
            let mut key_table = write_txn.open_table(API_KEYS).map_err(storage_err)?;

            let name_taken = user_table
                .get(user.name.as_str())
                .map_err(storage_err)?
                .is_some();
            let key_taken = key_table
                .get(user.api_key.as_str())
                .map_err(storage_err)?
                .is_some();
            if name_taken || key_taken {
                drop(user_table);
                drop(key_table);
                write_txn.abort().map_err(storage_err)?;
                if name_taken {
                    return Err(WidgetsError::UserExists(user.name.clone()));
                }
                return Err(WidgetsError::Storage("API key already issued".to_string()));
            }

            user_table
                .insert(user.name.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
            key_table
                .insert(user.api_key.as_str(), user.name.as_str())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn update_user(&self, user: &User) -> Result<(), WidgetsError> {
        let bytes = encode(user)?;
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut user_table = write_txn.open_table(USERS).map_err(storage_err)?;
            let mut key_table = write_txn.open_table(API_KEYS).map_err(storage_err)?;

            let previous: Option<User> = user_table
                .get(user.name.as_str())
                .map_err(storage_err)?
                .map(|data| decode(data.value()))
                .transpose()?;
            let Some(previous) = previous else {
                drop(user_table);
                drop(key_table);
                write_txn.abort().map_err(storage_err)?;
                return Err(WidgetsError::UserNotFound(user.name.clone()));
            };

            let holder = key_table
                .get(user.api_key.as_str())
                .map_err(storage_err)?
                .map(|v| v.value().to_string());
            if holder.is_some_and(|holder| holder != user.name) {
                drop(user_table);
                drop(key_table);
                write_txn.abort().map_err(storage_err)?;
                return Err(WidgetsError::Storage("API key already issued".to_string()));
            }

            key_table
                .remove(previous.api_key.as_str())
                .map_err(storage_err)?;
            key_table
                .insert(user.api_key.as_str(), user.name.as_str())
                .map_err(storage_err)?;
            user_table
                .insert(user.name.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<bool, WidgetsError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let removed = {
            let mut user_table = write_txn.open_table(USERS).map_err(storage_err)?;
            let mut key_table = write_txn.open_table(API_KEYS).map_err(storage_err)?;

            let previous: Option<User> = user_table
                .remove(name)
                .map_err(storage_err)?
                .map(|data| decode(data.value()))
                .transpose()?;
            match previous {
                Some(user) => {
                    key_table
                        .remove(user.api_key.as_str())
                        .map_err(storage_err)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(storage_err)?;
        Ok(removed)
    }

    fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, WidgetsError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let key_table = read_txn.open_table(API_KEYS).map_err(storage_err)?;
        let Some(name) = key_table
            .get(api_key)
            .map_err(storage_err)?
            .map(|v| v.value().to_string())
        else {
            return Ok(None);
        };

        let user_table = read_txn.open_table(USERS).map_err(storage_err)?;
        user_table
            .get(name.as_str())
            .map_err(storage_err)?
            .map(|data| decode(data.value()))
            .transpose()
    }

    fn export_snapshot(&self, path: &Path) -> Result<SnapshotStats, WidgetsError> {
        // One read transaction: the copy reflects a single commit point.
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let widgets = read_widgets(&read_txn)?;
        let users = read_users(&read_txn)?;
        let next_id = read_next_id(&read_txn)?;
        drop(read_txn);

        write_snapshot(path, &widgets, &users, next_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
