//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! User commands write their report to the `out` they are given, so the
//! messages can be checked in tests.

#[cfg(unix)]
use crate::admin;
use crate::api;
use crate::backup::{BackupScheduler, BackupTrigger};
use crate::cli::UserCommand;
use crate::config::ServerConfig;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use widgets_core::{RedbStore, SharedStore, User, WidgetStore, WidgetsError};

// =============================================================================
// HELPERS
// =============================================================================

fn emit(out: &mut impl Write, line: &str) -> Result<(), WidgetsError> {
    writeln!(out, "{}", line).map_err(|e| WidgetsError::Io(format!("Cannot write output: {}", e)))
}

/// Open an existing database; commands that only read must not create one.
fn open_existing(db_path: &Path) -> Result<RedbStore, WidgetsError> {
    if !db_path.exists() {
        return Err(WidgetsError::Io(format!(
            "Database '{}' does not exist",
            db_path.display()
        )));
    }
    RedbStore::open(db_path)
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server and the backup scheduler.
///
/// Shutdown order: stop accepting requests, drain in-flight ones, close the
/// admin channel, run the final backup, close the database.
pub async fn cmd_server(config: &ServerConfig, clear: bool) -> Result<(), WidgetsError> {
    config.check_serveable()?;

    if clear && config.database_path.exists() {
        std::fs::remove_file(&config.database_path).map_err(|e| {
            WidgetsError::Io(format!(
                "Cannot clear database '{}': {}",
                config.database_path.display(),
                e
            ))
        })?;
        tracing::warn!(
            "Cleared database {} before start",
            config.database_path.display()
        );
    }

    let store: SharedStore = Arc::new(RedbStore::open(&config.database_path)?);
    let users = store.list_users()?.len();
    if users == 0 {
        tracing::warn!("No API users exist; every request will be rejected until `widgets user create <name>` is run");
    }

    println!("Widgets CRUD REST API Starting...");
    println!();
    println!("Configuration:");
    println!("  Listen:   {}", config.listen_addr());
    println!("  Database: {}", config.database_path.display());
    println!("  Backups:  {}", config.backup_dir.display());
    match config.backup_interval() {
        Some(period) => println!("  Interval: {}s", period.as_secs()),
        None => println!("  Interval: disabled (shutdown backup only)"),
    }
    println!("  Users:    {}", users);
    #[cfg(unix)]
    println!("  Admin:    {}", config.admin_socket_path().display());
    println!();
    println!("Endpoints:");
    println!("  GET    /widget      - List widgets");
    println!("  POST   /widget      - Create a widget");
    println!("  GET    /widget/{{id}} - Read a widget");
    println!("  PUT    /widget/{{id}} - Update a widget");
    println!("  DELETE /widget/{{id}} - Delete a widget");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let scheduler = Arc::new(BackupScheduler::new(
        Arc::clone(&store),
        config.backup_dir.clone(),
        config.backup_interval(),
    ));
    let (stop_tx, stop_rx) = watch::channel(false);
    let admin_task = spawn_admin_channel(config, &store, &stop_rx)?;
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(stop_rx));

    let served = api::run_server(
        &config.listen_addr(),
        Arc::clone(&store),
        api::shutdown_signal(),
    )
    .await;

    // Receivers only go away if their tasks already ended.
    let _ = stop_tx.send(true);
    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            tracing::error!("Admin channel task failed: {}", e);
        }
    }
    if let Err(e) = scheduler_task.await {
        tracing::error!("Backup scheduler task failed: {}", e);
    }

    drop(scheduler);
    drop(store);
    tracing::info!("Widgets server stopped");
    served
}

#[cfg(unix)]
fn spawn_admin_channel(
    config: &ServerConfig,
    store: &SharedStore,
    stop_rx: &watch::Receiver<bool>,
) -> Result<Option<JoinHandle<()>>, WidgetsError> {
    let path = config.admin_socket_path();
    let listener = admin::bind(&path)?;
    Ok(Some(tokio::spawn(admin::serve(
        listener,
        path,
        Arc::clone(store),
        stop_rx.clone(),
    ))))
}

#[cfg(not(unix))]
fn spawn_admin_channel(
    _config: &ServerConfig,
    _store: &SharedStore,
    _stop_rx: &watch::Receiver<bool>,
) -> Result<Option<JoinHandle<()>>, WidgetsError> {
    tracing::warn!("No admin channel on this platform; stop the server to manage users");
    Ok(None)
}

// =============================================================================
// USER COMMANDS
// =============================================================================

/// Apply a user command to `store` and return the lines to print.
///
/// Shared by the CLI, when it owns the database, and by the admin channel of
/// a running server.
pub fn run_user_command(
    store: &dyn WidgetStore,
    command: &UserCommand,
) -> Result<Vec<String>, WidgetsError> {
    match command {
        UserCommand::Create { name } => {
            let user = User::new(name)?;
            store.insert_user(&user)?;
            Ok(vec![format!(
                "Creating api user {} with key {}",
                user.name, user.api_key
            )])
        }
        UserCommand::Delete { name } => {
            if !store.delete_user(name)? {
                return Err(WidgetsError::UserNotFound(name.clone()));
            }
            Ok(vec!["User deleted!".to_string()])
        }
        // Prints the current key; `rotate` is what changes it.
        UserCommand::Regen { name } => {
            let user = store
                .get_user(name)?
                .ok_or_else(|| WidgetsError::UserNotFound(name.clone()))?;
            Ok(vec![format!("User key is {}", user.api_key)])
        }
        UserCommand::Rotate { name } => {
            let mut user = store
                .get_user(name)?
                .ok_or_else(|| WidgetsError::UserNotFound(name.clone()))?;
            user.rotate_key();
            store.update_user(&user)?;
            Ok(vec![format!(
                "New key for user {} is {}",
                user.name, user.api_key
            )])
        }
        UserCommand::List => Ok(store
            .list_users()?
            .into_iter()
            .map(|user| user.name)
            .collect()),
    }
}

#[cfg(unix)]
fn forward_to_server(
    config: &ServerConfig,
    command: &UserCommand,
) -> Result<Option<Vec<String>>, WidgetsError> {
    admin::request(&config.admin_socket_path(), command)
}

#[cfg(not(unix))]
fn forward_to_server(
    _config: &ServerConfig,
    _command: &UserCommand,
) -> Result<Option<Vec<String>>, WidgetsError> {
    Ok(None)
}

/// Run a user command and print its report.
///
/// A server listening on the admin socket applies the command to the store
/// it serves from. Without one, the database file is opened here; only
/// `create` may bring a new database into existence.
pub fn cmd_user(
    config: &ServerConfig,
    command: &UserCommand,
    out: &mut impl Write,
) -> Result<(), WidgetsError> {
    let lines = match forward_to_server(config, command)? {
        Some(lines) => lines,
        None => {
            let store = match command {
                UserCommand::Create { .. } => RedbStore::open(&config.database_path)?,
                _ => open_existing(&config.database_path)?,
            };
            run_user_command(&store, command)?
        }
    };
    for line in &lines {
        emit(out, line)?;
    }
    Ok(())
}

// =============================================================================
// BACKUP COMMAND
// =============================================================================

/// Write one snapshot of the configured database into `backup_dir`.
pub fn cmd_backup(config: &ServerConfig, out: &mut impl Write) -> Result<(), WidgetsError> {
    let store: SharedStore = Arc::new(open_existing(&config.database_path)?);
    let scheduler = BackupScheduler::new(store, config.backup_dir.clone(), None);
    let report = scheduler.backup_now(BackupTrigger::Manual)?;
    tracing::info!(
        event = "backup_completed",
        trigger = %report.trigger,
        path = %report.path.display(),
        widgets = report.stats.widgets,
        users = report.stats.users,
        "Database backup completed"
    );
    emit(
        out,
        &format!(
            "Backup written to {} ({} widgets, {} users)",
            report.path.display(),
            report.stats.widgets,
            report.stats.users
        ),
    )
}

// =============================================================================
// TESTS
// =============================================================================
