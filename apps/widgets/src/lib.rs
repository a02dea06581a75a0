//! # widgets
//!
//! The async half of the widgets service: HTTP API, backup scheduler,
//! admin channel, configuration and CLI. `main.rs` is a thin entry point
//! over this library so integration tests can build the router directly.

#[cfg(unix)]
pub mod admin;
pub mod api;
pub mod backup;
pub mod cli;
pub mod config;
