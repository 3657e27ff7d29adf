//! Storage engine implementations.
//!
//! `memory` is always compiled; the persistent engines are feature-gated
//! so embedders can strip the backend they do not ship.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryEngine;
#[cfg(feature = "redb")]
pub use redb::RedbEngine;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEngine;
