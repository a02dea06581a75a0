//! # Widgets CLI Module
//!
//! This module implements the command-line interface for the widgets service.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server and backup scheduler
//! - `user create|delete|regen|rotate|list` - Manage API users
//! - `backup` - Write one snapshot of the database and exit
//!
//! User commands go to the running server through its admin socket when one
//! is listening, and open the database directly otherwise. `backup` always
//! opens the database, so it is for a stopped server.

mod commands;

use crate::config::ServerConfig;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use widgets_core::WidgetsError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Widgets - CRUD REST API for widget records
///
/// Serves widgets over HTTP behind per-user API keys and keeps
/// periodic snapshot backups of its database.
#[derive(Parser, Debug)]
#[command(name = "widgets")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the widgets database (overrides config and WIDGETS_DB)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory for database backups
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Seconds between periodic backups (0 disables them)
        #[arg(long)]
        backup_interval: Option<u64>,

        /// Delete the database before starting
        #[arg(long)]
        clear: bool,
    },

    /// Manage API users
    User {
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Write one backup of the database and exit
    Backup {
        /// Directory to write the backup into (defaults to the configured backup_dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

/// User management subcommands.
///
/// Also the request type of the admin channel.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCommand {
    /// Create a user and print its API key
    Create {
        /// User name (1 to 64 characters)
        name: String,
    },

    /// Delete a user; its key stops working immediately
    Delete { name: String },

    /// Print a user's current API key
    Regen { name: String },

    /// Issue a new API key for a user; the old key stops working
    Rotate { name: String },

    /// List user names
    List,
}

impl UserCommand {
    /// Short name of the command for log events.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Create { .. } => "user_create",
            Self::Delete { .. } => "user_delete",
            Self::Regen { .. } => "user_regen",
            Self::Rotate { .. } => "user_rotate",
            Self::List => "user_list",
        }
    }

    /// The user the command acts on, if any.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::Create { name }
            | Self::Delete { name }
            | Self::Regen { name }
            | Self::Rotate { name } => Some(name),
            Self::List => None,
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Resolve the effective configuration: defaults, file, environment, then flags.
pub fn load_config(cli: &Cli) -> Result<ServerConfig, WidgetsError> {
    let mut config = ServerConfig::load(cli.config.as_deref())?;

    if let Some(database) = &cli.database {
        config.database_path.clone_from(database);
    }

    match &cli.command {
        Commands::Server {
            host,
            port,
            backup_dir,
            backup_interval,
            ..
        } => {
            if let Some(host) = host {
                config.host.clone_from(host);
            }
            if let Some(port) = port {
                config.port = *port;
            }
            if let Some(dir) = backup_dir {
                config.backup_dir.clone_from(dir);
            }
            if let Some(secs) = backup_interval {
                config.backup_interval_secs = *secs;
            }
        }
        Commands::Backup {
            output_dir: Some(dir),
        } => config.backup_dir.clone_from(dir),
        Commands::Backup { output_dir: None } | Commands::User { .. } => {}
    }

    Ok(config)
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments against the resolved configuration.
pub async fn execute(cli: Cli, config: ServerConfig) -> Result<(), WidgetsError> {
    match cli.command {
        Commands::Server { clear, .. } => cmd_server(&config, clear).await,
        Commands::User { action } => cmd_user(&config, &action, &mut std::io::stdout().lock()),
        Commands::Backup { .. } => cmd_backup(&config, &mut std::io::stdout().lock()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn server_flags_override_config() {
        let cli = Cli::parse_from([
            "widgets",
            "-D",
            "/tmp/w.redb",
            "server",
            "--host",
            "0.0.0.0",
            "--port",
            "9999",
            "--backup-interval",
            "0",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/w.redb"));
        assert_eq!(config.listen_addr(), "0.0.0.0:9999");
        assert_eq!(config.backup_interval(), None);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["widgets", "user", "list", "-q", "-D", "x.redb"]);
        assert!(cli.quiet);
        assert_eq!(cli.database, Some(PathBuf::from("x.redb")));
        assert!(matches!(
            cli.command,
            Commands::User {
                action: UserCommand::List
            }
        ));
    }

    #[test]
    fn backup_output_dir_overrides_backup_dir() {
        let cli = Cli::parse_from(["widgets", "backup", "--output-dir", "/srv/snap"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/srv/snap"));
    }

    #[test]
    fn user_command_wire_form() {
        let command = UserCommand::Rotate {
            name: "alice".to_string(),
        };
        let line = serde_json::to_string(&command).unwrap();
        assert_eq!(line, r#"{"Rotate":{"name":"alice"}}"#);
        assert_eq!(serde_json::from_str::<UserCommand>(&line).unwrap(), command);
        assert_eq!(serde_json::to_string(&UserCommand::List).unwrap(), r#""List""#);
        assert_eq!(command.user_name(), Some("alice"));
        assert_eq!(UserCommand::List.operation(), "user_list");
    }

    #[test]
    fn user_commands_require_a_name() {
        assert!(Cli::try_parse_from(["widgets", "user", "create"]).is_err());
        assert!(Cli::try_parse_from(["widgets", "user", "regen", "alice"]).is_ok());
    }
}
