//! Callbacks into the presentation layer.

use snipmaster_common::{Record, RecordId};
use snipmaster_sync::SyncReport;

/// Integration points a front end may implement.
///
/// Every method defaults to doing nothing, so a caller only overrides the
/// events it renders.
pub trait SnippetHooks: Send + Sync {
    fn on_saved(&self, _record: &Record) {}

    fn on_deleted(&self, _id: &RecordId) {}

    /// A full pass finished (including passes run by the background worker).
    fn on_synced(&self, _report: &SyncReport) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SnippetHooks for NoopHooks {}
