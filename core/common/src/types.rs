//! Record model shared throughout SnipMaster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category assigned to records saved without one.
pub const DEFAULT_CATEGORY: &str = "General";

/// Unique identifier for a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new RecordId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or only whitespace
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "RecordId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Derive an id from a creation timestamp (milliseconds since the epoch).
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_millis().to_string())
    }

    /// The id that follows this one.
    ///
    /// Numeric ids advance by one; anything else gets a `-1` suffix. Used to
    /// step past a generated id that is already taken.
    pub fn successor(&self) -> Self {
        match self.0.parse::<u64>() {
            Ok(n) => Self((n + 1).to_string()),
            Err(_) => Self(format!("{}-1", self.0)),
        }
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

/// Synchronization state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local state not yet acknowledged by the remote authority.
    Pending,
    /// Acknowledged by the remote authority.
    Synced,
    /// Quarantined after too many failed attempts.
    Error,
}

impl SyncStatus {
    /// Lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown sync status: {}",
                other
            ))),
        }
    }
}

/// Languages a snippet can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    #[default]
    JavaScript,
    TypeScript,
    Html,
    Css,
    Python,
    Java,
    Php,
    Ruby,
    Markdown,
    Json,
    Xml,
    Sql,
    Bash,
    C,
    Cpp,
    CSharp,
    PlainText,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Language; 17] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Html,
        Language::Css,
        Language::Python,
        Language::Java,
        Language::Php,
        Language::Ruby,
        Language::Markdown,
        Language::Json,
        Language::Xml,
        Language::Sql,
        Language::Bash,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::PlainText,
    ];

    /// Identifier used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Html => "html",
            Language::Css => "css",
            Language::Python => "python",
            Language::Java => "java",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Xml => "xml",
            Language::Sql => "sql",
            Language::Bash => "bash",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::PlainText => "plaintext",
        }
    }

    /// Guess the language from a file name's extension.
    ///
    /// Unknown or missing extensions map to plain text.
    pub fn from_filename(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "js" | "mjs" => Language::JavaScript,
            "ts" => Language::TypeScript,
            "html" | "htm" => Language::Html,
            "css" => Language::Css,
            "py" => Language::Python,
            "java" => Language::Java,
            "php" => Language::Php,
            "rb" => Language::Ruby,
            "md" => Language::Markdown,
            "json" => Language::Json,
            "xml" => Language::Xml,
            "sql" => Language::Sql,
            "sh" => Language::Bash,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "cs" => Language::CSharp,
            _ => Language::PlainText,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.as_str() == lowered)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown language: {}", s)))
    }
}

// Stored data may carry identifiers this build does not know; keep the
// record readable instead of failing the whole load.
impl From<String> for Language {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(Language::PlainText)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.as_str().to_string()
    }
}

/// A stored snippet with its sync metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub code: String,
    pub language: Language,
    pub category: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub sync_status: SyncStatus,
    /// Consecutive failed remote attempts since the last edit or acknowledgement.
    #[serde(default)]
    pub sync_failures: u32,
}

impl Record {
    /// Whether the record still waits for remote acknowledgement.
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }
}

/// Input to a save: a record whose identity and timestamps may not exist yet.
///
/// Also the shape of entries in the legacy flat snippet list, so every field
/// except `code` tolerates being absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_status: Option<SyncStatus>,
}

impl RecordDraft {
    /// Draft for a brand-new record.
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            ..Default::default()
        }
    }

    /// Target an existing record id.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl From<Record> for RecordDraft {
    fn from(record: Record) -> Self {
        Self {
            id: Some(record.id),
            code: record.code,
            language: record.language,
            category: Some(record.category),
            created: Some(record.created),
            sync_status: Some(record.sync_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_record_id_empty_fails() {
        assert!(RecordId::new("").is_err());
        assert!(RecordId::new("   ").is_err());
    }

    #[test]
    fn test_record_id_from_timestamp() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(RecordId::from_timestamp(at).as_str(), "1700000000123");
    }

    #[test]
    fn test_record_id_successor() {
        assert_eq!(RecordId::new("41").unwrap().successor().as_str(), "42");
        assert_eq!(RecordId::new("abc").unwrap().successor().as_str(), "abc-1");
    }

    #[test]
    fn test_language_from_filename() {
        assert_eq!(Language::from_filename("main.py"), Language::Python);
        assert_eq!(Language::from_filename("index.HTM"), Language::Html);
        assert_eq!(Language::from_filename("deploy.sh"), Language::Bash);
        assert_eq!(Language::from_filename("README"), Language::PlainText);
        assert_eq!(Language::from_filename("notes.txt"), Language::PlainText);
    }

    #[test]
    fn test_unknown_language_deserializes_as_plaintext() {
        let lang: Language = serde_json::from_str("\"brainfuck\"").unwrap();
        assert_eq!(lang, Language::PlainText);
        assert!("brainfuck".parse::<Language>().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = Record {
            id: RecordId::new("1").unwrap(),
            code: "x".to_string(),
            language: Language::JavaScript,
            category: DEFAULT_CATEGORY.to_string(),
            created: now,
            last_modified: now,
            sync_status: SyncStatus::Pending,
            sync_failures: 0,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["syncStatus"], "pending");
        assert_eq!(json["language"], "javascript");
        assert!(json.get("lastModified").is_some());
    }

    #[test]
    fn test_legacy_draft_parses_with_missing_fields() {
        let draft: RecordDraft =
            serde_json::from_str(r#"{"id":"1699999999999","code":"print(1)","language":"python"}"#)
                .unwrap();
        assert_eq!(draft.language, Language::Python);
        assert!(draft.category.is_none());
        assert!(draft.created.is_none());
    }

    proptest! {
        #[test]
        fn prop_language_identifier_roundtrip(idx in 0usize..Language::ALL.len()) {
            let lang = Language::ALL[idx];
            prop_assert_eq!(lang.as_str().parse::<Language>().unwrap(), lang);
        }
    }
}
