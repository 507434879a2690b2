//! Record storage for SnipMaster.
//!
//! A `RecordStore` sits on top of a pluggable `RecordBackend` (in-memory or
//! SQLite) and owns the sync metadata of every snippet: which records are
//! still pending, when the last successful sync happened, and whether the
//! legacy snippet list has been imported.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in the store
//! - Async operations: all I/O is async
//! - Single-record atomicity: read-modify-write paths are serialized

pub mod backend;
pub mod broadcast;
pub mod memory;
pub mod migration;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use backend::RecordBackend;
pub use broadcast::{LastSyncNotice, SyncBroadcast};
pub use memory::MemoryBackend;
pub use migration::{LegacySource, MigrationOutcome, LEGACY_SNIPPETS_KEY, MIGRATION_FLAG_KEY};
pub use registry::{BackendFactory, BackendRegistry};
pub use sqlite::SqliteBackend;
pub use store::{RecordStore, LAST_SYNC_KEY, SYNC_EVENT_KEY};
