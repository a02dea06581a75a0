//! # Backup Scheduler
//!
//! Writes snapshot copies of the store to a backup directory.
//!
//! ## Triggers
//!
//! - **Periodic**: every `interval` while the server runs. The first one
//!   fires one interval after start.
//! - **Shutdown**: exactly once, when the shutdown channel flips, which the
//!   server does after it has stopped accepting requests.
//! - **Manual**: the `backup` CLI command.
//!
//! ## File names
//!
//! `widgets.<YYYYmmddHHMMSS>.<seq>.redb`, where `seq` is a per-scheduler
//! counter. Two backups in the same second differ in `seq`; if a name is
//! already taken on disk (say, by an earlier process) the counter moves on.
//!
//! A failed backup is logged and otherwise ignored. It never reaches the
//! request path.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use widgets_core::{SharedStore, SnapshotStats, WidgetsError};

/// Prefix of every backup file name.
const BACKUP_PREFIX: &str = "widgets";

/// Extension of every backup file name.
const BACKUP_EXTENSION: &str = "redb";

/// What caused a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupTrigger {
    Periodic,
    Shutdown,
    Manual,
}

impl fmt::Display for BackupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Periodic => "periodic",
            Self::Shutdown => "shutdown",
            Self::Manual => "manual",
        })
    }
}

/// A completed backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub trigger: BackupTrigger,
    pub stats: SnapshotStats,
}

/// Periodic and shutdown-time snapshot export.
pub struct BackupScheduler {
    store: SharedStore,
    dir: PathBuf,
    interval: Option<Duration>,
    sequence: AtomicU64,
}

impl fmt::Debug for BackupScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupScheduler")
            .field("dir", &self.dir)
            .field("interval", &self.interval)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BackupScheduler {
    /// Create a scheduler. `interval = None` (or zero) disables periodic backups.
    #[must_use]
    pub fn new(store: SharedStore, dir: impl Into<PathBuf>, interval: Option<Duration>) -> Self {
        Self {
            store,
            dir: dir.into(),
            interval: interval.filter(|period| !period.is_zero()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Pick an unused file name for a backup taken at `at`.
    fn next_path(&self, at: DateTime<Utc>) -> PathBuf {
        let stamp = at.format("%Y%m%d%H%M%S");
        loop {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let candidate = self.dir.join(format!(
                "{}.{}.{:04}.{}",
                BACKUP_PREFIX, stamp, seq, BACKUP_EXTENSION
            ));
            if !candidate.exists() {
                return candidate;
            }
        }
    }

    /// Take a backup now, blocking the calling thread.
    pub fn backup_now(&self, trigger: BackupTrigger) -> Result<BackupReport, WidgetsError> {
        self.backup_at(trigger, Utc::now())
    }

    /// Take a backup stamped with `at`, blocking the calling thread.
    pub fn backup_at(
        &self,
        trigger: BackupTrigger,
        at: DateTime<Utc>,
    ) -> Result<BackupReport, WidgetsError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            WidgetsError::Io(format!(
                "Cannot create backup directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.next_path(at);
        let stats = self.store.export_snapshot(&path)?;
        Ok(BackupReport {
            path,
            trigger,
            stats,
        })
    }

    /// Take a backup on the blocking pool and log the outcome.
    ///
    /// Never fails: errors are logged and reported as `None`.
    pub async fn run_once(self: &Arc<Self>, trigger: BackupTrigger) -> Option<BackupReport> {
        let scheduler = Arc::clone(self);
        let outcome = tokio::task::spawn_blocking(move || scheduler.backup_now(trigger))
            .await
            .map_err(|e| WidgetsError::Io(format!("Backup task failed: {}", e)))
            .and_then(|result| result);

        match outcome {
            Ok(report) => {
                tracing::info!(
                    event = "backup_completed",
                    trigger = %report.trigger,
                    path = %report.path.display(),
                    widgets = report.stats.widgets,
                    users = report.stats.users,
                    "Database backup completed"
                );
                Some(report)
            }
            Err(e) => {
                tracing::error!(
                    event = "backup_failed",
                    trigger = %trigger,
                    dir = %self.dir.display(),
                    error = %e,
                    "Database backup failed"
                );
                None
            }
        }
    }

    /// Run until `shutdown` becomes `true` (or its sender is dropped),
    /// then take the shutdown backup and return.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = self.interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        match self.interval {
            Some(period) => tracing::info!(
                "Backup scheduler started (every {}s into {})",
                period.as_secs(),
                self.dir.display()
            ),
            None => tracing::info!(
                "Backup scheduler started (periodic backups disabled, shutdown backup into {})",
                self.dir.display()
            ),
        }

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let tick = async {
                match ticker.as_mut() {
                    Some(t) => {
                        t.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = tick => {
                    self.run_once(BackupTrigger::Periodic).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: the server is not coming back.
                        break;
                    }
                }
            }
        }

        self.run_once(BackupTrigger::Shutdown).await;
        tracing::info!("Backup scheduler stopped");
    }
}

// =============================================================================
// TESTS
// =============================================================================
