//! One-time import of the legacy flat snippet list.

use tracing::{error, info};

use snipmaster_common::{Error, RecordDraft, Result};

use crate::store::RecordStore;

/// Settings key of the flag set once the legacy list has been imported.
pub const MIGRATION_FLAG_KEY: &str = "db_migration_done";
/// Settings key under which older versions kept every snippet as one JSON list.
pub const LEGACY_SNIPPETS_KEY: &str = "snippets";

/// Where the legacy list comes from.
#[derive(Debug, Clone)]
pub enum LegacySource {
    /// The `snippets` key of the store's own settings.
    Settings,
    /// A JSON document supplied by the caller, e.g. an exported file.
    Json(String),
}

/// Result of a migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The flag was already set; nothing was read.
    AlreadyDone,
    /// This many legacy entries were imported.
    Imported(usize),
}

impl RecordStore {
    /// Import the legacy snippet list once.
    ///
    /// Every entry is saved as pending so the next pass uploads it. The
    /// migration flag is only set once all entries are in; a list that fails
    /// to parse leaves it unset so a later run can retry.
    pub async fn migrate_legacy(&self, source: LegacySource) -> Result<MigrationOutcome> {
        if self
            .backend()
            .get_setting(MIGRATION_FLAG_KEY)
            .await?
            .is_some_and(|flag| flag == "true")
        {
            return Ok(MigrationOutcome::AlreadyDone);
        }

        let raw = match source {
            LegacySource::Settings => self.backend().get_setting(LEGACY_SNIPPETS_KEY).await?,
            LegacySource::Json(json) => Some(json),
        };

        let drafts: Vec<RecordDraft> = match raw.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(json) => serde_json::from_str(json).map_err(|e| {
                error!("Legacy snippet list is unreadable: {}", e);
                Error::Serialization(format!("legacy snippet list: {}", e))
            })?,
        };

        let count = drafts.len();
        for draft in drafts {
            self.save(draft, true).await?;
        }

        self.backend().set_setting(MIGRATION_FLAG_KEY, "true").await?;
        if count > 0 {
            info!("Migrated {} legacy snippets", count);
        }
        Ok(MigrationOutcome::Imported(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordBackend;
    use crate::memory::MemoryBackend;
    use snipmaster_common::{Language, RecordId, SyncStatus};
    use std::sync::Arc;

    const LEGACY: &str = r#"[
        {"id": "1699999999001", "code": "console.log(1)", "language": "javascript", "category": "Demo"},
        {"id": "1699999999002", "code": "print(2)", "language": "python", "syncStatus": "synced"}
    ]"#;

    #[tokio::test]
    async fn test_migrates_from_settings_once() {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::open(backend.clone()).await.unwrap();
        backend.set_setting(LEGACY_SNIPPETS_KEY, LEGACY).await.unwrap();

        let outcome = store.migrate_legacy(LegacySource::Settings).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Imported(2));

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.sync_status == SyncStatus::Pending));

        let py = store
            .get_by_id(&RecordId::new("1699999999002").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(py.language, Language::Python);
        assert_eq!(py.category, "General");

        let again = store.migrate_legacy(LegacySource::Settings).await.unwrap();
        assert_eq!(again, MigrationOutcome::AlreadyDone);
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_legacy_list_sets_flag() {
        let store = RecordStore::open(Arc::new(MemoryBackend::new())).await.unwrap();
        assert_eq!(
            store.migrate_legacy(LegacySource::Settings).await.unwrap(),
            MigrationOutcome::Imported(0)
        );
        assert_eq!(
            store.migrate_legacy(LegacySource::Json(LEGACY.to_string())).await.unwrap(),
            MigrationOutcome::AlreadyDone
        );
    }

    #[tokio::test]
    async fn test_unreadable_list_leaves_flag_unset() {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::open(backend.clone()).await.unwrap();

        let result = store
            .migrate_legacy(LegacySource::Json("{not json".to_string()))
            .await;
        assert!(matches!(result, Err(Error::Serialization(_))));
        assert!(backend.get_setting(MIGRATION_FLAG_KEY).await.unwrap().is_none());

        let retry = store
            .migrate_legacy(LegacySource::Json(LEGACY.to_string()))
            .await
            .unwrap();
        assert_eq!(retry, MigrationOutcome::Imported(2));
    }
}
