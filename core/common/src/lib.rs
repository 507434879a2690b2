//! Common utilities and types shared across the SnipMaster crates.
//!
//! This module provides the record model and the error type that every
//! other crate in the workspace builds on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Language, Record, RecordDraft, RecordId, SyncStatus, DEFAULT_CATEGORY};
