//! SnipMaster application core.
//!
//! Wires the record store, the sync engine, the background worker, the
//! connectivity monitor and (optionally) the request cache into a single
//! [`SnipMaster`] handle that front ends drive.
//!
//! # Example
//! ```no_run
//! # async fn demo() -> snipmaster_common::Result<()> {
//! use snipmaster_app::{AppConfig, SnipMaster};
//! use snipmaster_common::{Language, RecordDraft};
//!
//! let app = SnipMaster::open(AppConfig::in_memory()).await?;
//! app.save(RecordDraft::new("fn main() {}", Language::PlainText)).await?;
//! let report = app.sync_all().await?;
//! println!("{} synced", report.succeeded);
//! app.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod facade;
pub mod hooks;

pub use config::{AppConfig, RemoteConfig, SyncSettings, CONFIG_FILENAME, DATABASE_FILENAME};
pub use facade::{SnipMaster, SnipMasterBuilder, StatusSummary};
pub use hooks::{NoopHooks, SnippetHooks};
