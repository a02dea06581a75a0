//! # widgets-core
//!
//! The logic of the widgets service - THE LOGIC.
//!
//! This crate decides everything about a request that does not involve the
//! network: whether a payload is a valid widget, whether an API key belongs
//! to a user, and how records are stored and snapshotted.
//!
//! ## Components (leaves first)
//!
//! - `store` → the `WidgetStore` persistence interface
//! - `storage` → `RedbStore` (disk, ACID) and `MemoryStore` (volatile)
//! - `validation` → the widget payload grammar
//! - `auth` → API key to `Identity` resolution
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Does not log; every outcome is returned to the caller as a value
//! - Stores hand out owned copies of records, never references into storage

// =============================================================================
// MODULES
// =============================================================================

pub mod auth;
pub mod primitives;
pub mod storage;
pub mod store;
pub mod types;
pub mod validation;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Identity, User, Widget, WidgetDraft, WidgetsError};

// =============================================================================
// RE-EXPORTS: Logic
// =============================================================================

pub use auth::{AuthFailure, authenticate};
pub use storage::{MemoryStore, RedbStore};
pub use store::{SharedStore, SnapshotStats, WidgetStore};
pub use validation::{SchemaViolation, Validation, validate, validate_name};
