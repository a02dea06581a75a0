//! # Widgets - CRUD REST API Server
//!
//! The main binary for the widgets service.
//!
//! This application provides:
//! - HTTP REST API server (axum-based) over `/widget`
//! - Periodic and shutdown-time database backups
//! - CLI interface for API user management
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   apps/widgets (THE BINARY)                  │
//! │                                                              │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐   │
//! │  │   CLI       │    │   HTTP API  │    │ Backup Scheduler│   │
//! │  │  (clap)     │    │   (axum)    │    │  (tokio timer)  │   │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬────────┘   │
//! │         │                  │                    │            │
//! │         └──────────────────┼────────────────────┘            │
//! │                            ▼                                 │
//! │                    ┌───────────────┐                         │
//! │                    │ widgets-core  │                         │
//! │                    │ (THE LOGIC)   │                         │
//! │                    └───────────────┘                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Issue a key, then start the server
//! widgets user create alice
//! widgets server --host 0.0.0.0 --port 8888
//!
//! # One-off backup of a stopped server's database
//! widgets backup --output-dir /var/backups/widgets
//! ```

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{
    EnvFilter, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};
use widgets::cli::{self, Commands};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    let config = match cli::load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(config.log_file.as_deref(), cli.verbose) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Display startup banner
    if !cli.quiet && matches!(cli.command, Commands::Server { .. }) {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli, config).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing. `WIDGETS_LOG_FORMAT=json` enables machine-parseable
/// output; `log_file` sends it to a file (appended, no colors).
fn init_tracing(log_file: Option<&Path>, verbose: bool) -> Result<(), String> {
    let log_format = std::env::var("WIDGETS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if verbose {
        "widgets=debug,tower_http=debug"
    } else {
        "widgets=info,tower_http=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Cannot open log file '{}': {}", path.display(), e))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(ansi)
                        .with_writer(writer),
                )
                .init();
        }
    }
    Ok(())
}

/// Print the widgets startup banner.
fn print_banner() {
    println!(
        r#"
  ██╗    ██╗██╗██████╗  ██████╗ ███████╗████████╗███████╗
  ██║    ██║██║██╔══██╗██╔════╝ ██╔════╝╚══██╔══╝██╔════╝
  ██║ █╗ ██║██║██║  ██║██║  ███╗█████╗     ██║   ███████╗
  ██║███╗██║██║██║  ██║██║   ██║██╔══╝     ██║   ╚════██║
  ╚███╔███╔╝██║██████╔╝╚██████╔╝███████╗   ██║   ███████║
   ╚══╝╚══╝ ╚═╝╚═════╝  ╚═════╝ ╚══════╝   ╚═╝   ╚══════╝

  Widgets CRUD REST API v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
