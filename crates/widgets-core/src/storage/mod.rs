//! # Storage
//!
//! `WidgetStore` implementations.
//!
//! - `RedbStore`: disk-backed, ACID, what the server runs on
//! - `MemoryStore`: volatile, for tests and embedding
//!
//! Both export snapshots in the redb format.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;
