//! Backend registry for resolving record backends from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use snipmaster_common::{Error, Result};

use crate::backend::RecordBackend;
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;

/// Factory function type for creating backends.
pub type BackendFactory = Box<dyn Fn(Value) -> Result<Arc<dyn RecordBackend>> + Send + Sync>;

/// Registry of record backend factories, keyed by name.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `memory` and `sqlite` backends.
    ///
    /// The `sqlite` factory expects `{"path": "<file>"}`.
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<String, BackendFactory> = HashMap::new();

        factories.insert(
            "memory".to_string(),
            Box::new(|_config| Ok(Arc::new(MemoryBackend::new()))),
        );

        factories.insert(
            "sqlite".to_string(),
            Box::new(|config| {
                let path = config
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        Error::Config("sqlite backend requires a 'path'".to_string())
                    })?;
                Ok(Arc::new(SqliteBackend::new(path)))
            }),
        );

        Self { factories }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - `InvalidInput` if the name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a backend by name from its configuration.
    ///
    /// # Errors
    /// - `NotFound` if no backend has that name
    /// - whatever the factory reports for invalid configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn RecordBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Backend '{}' is not registered (available: {})",
                    name,
                    self.backends().join(", ")
                ))
            })?;
        factory(config)
    }

    /// Names of all registered backends.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.backends(), vec!["memory", "sqlite"]);

        let memory = registry.resolve("memory", Value::Null).unwrap();
        assert_eq!(memory.name(), "memory");

        let sqlite = registry
            .resolve("sqlite", json!({"path": "/tmp/snippets.db"}))
            .unwrap();
        assert_eq!(sqlite.name(), "sqlite");
    }

    #[test]
    fn test_sqlite_requires_path() {
        let registry = BackendRegistry::with_defaults();
        assert!(matches!(
            registry.resolve("sqlite", json!({})),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = BackendRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryBackend::new()))));
        assert!(result.is_err());
        assert!(registry.has_backend("test"));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = BackendRegistry::new();
        assert!(matches!(
            registry.resolve("indexeddb", Value::Null),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_backend_lists_available() {
        let registry = BackendRegistry::with_defaults();
        match registry.resolve("indexeddb", Value::Null) {
            Err(Error::NotFound(msg)) => {
                assert!(msg.contains("indexeddb"));
                assert!(msg.contains("available: memory, sqlite"));
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("unknown backend resolved"),
        }
    }
}
