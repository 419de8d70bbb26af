//! Ordered, named backend registry.
//!
//! Registration order is merge order: later backends override earlier ones.

use super::Backend;
use crate::error::{ConfigError, ConfigResult};
use std::fmt;
use std::sync::Arc;

/// A registered backend and the name it was registered under.
#[derive(Clone)]
pub struct BackendEntry {
    name: String,
    backend: Arc<dyn Backend>,
}

impl BackendEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

impl fmt::Debug for BackendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEntry")
            .field("name", &self.name)
            .field("source", &self.backend.source())
            .finish()
    }
}

/// Ordered list of uniquely named backends.
#[derive(Clone, Default, Debug)]
pub struct BackendCollection {
    entries: Vec<BackendEntry>,
}

impl BackendCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend (highest priority so far).
    pub fn push(&mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> ConfigResult<()> {
        let entry = self.new_entry(name.into(), backend)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Alias for [`push`](Self::push).
    pub fn use_backend(&mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> ConfigResult<()> {
        self.push(name, backend)
    }

    /// Prepend a backend (lowest priority).
    pub fn unshift(&mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> ConfigResult<()> {
        let entry = self.new_entry(name.into(), backend)?;
        self.entries.insert(0, entry);
        Ok(())
    }

    /// Insert directly before `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> ConfigResult<()> {
        let entry = self.new_entry(name.into(), backend)?;
        let index = self.index_of(anchor)?;
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Insert directly after `anchor`.
    pub fn insert_after(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> ConfigResult<()> {
        let entry = self.new_entry(name.into(), backend)?;
        let index = self.index_of(anchor)?;
        self.entries.insert(index + 1, entry);
        Ok(())
    }

    /// Remove a backend, returning it.
    pub fn delete(&mut self, name: &str) -> ConfigResult<Arc<dyn Backend>> {
        let index = self.index_of(name)?;
        Ok(self.entries.remove(index).backend)
    }

    /// Backend registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.backend)
    }

    /// Merge position of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn entries(&self) -> &[BackendEntry] {
        &self.entries
    }

    /// Backends in merge order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.entries.iter().map(|entry| &entry.backend)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every backend reports fresh. Stops at the first stale one.
    pub fn fresh_all(&self) -> bool {
        self.entries.iter().all(|entry| entry.backend.is_fresh())
    }

    fn new_entry(&self, name: String, backend: Arc<dyn Backend>) -> ConfigResult<BackendEntry> {
        if self.position(&name).is_some() {
            return Err(ConfigError::DuplicateName(name));
        }
        Ok(BackendEntry { name, backend })
    }

    fn index_of(&self, name: &str) -> ConfigResult<usize> {
        self.position(name)
            .ok_or_else(|| ConfigError::NameNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;
    use serde_json::json;

    fn backend(name: &str) -> Arc<dyn Backend> {
        Arc::new(StaticBackend::new(name, json!({})))
    }

    #[test]
    fn test_positional_insertion() {
        let mut backends = BackendCollection::new();
        backends.push("app", backend("app")).unwrap();
        backends.use_backend("env", backend("env")).unwrap();
        backends.unshift("defaults", backend("defaults")).unwrap();
        backends.insert_before("env", "credentials", backend("credentials")).unwrap();
        backends.insert_after("env", "db", backend("db")).unwrap();

        assert_eq!(
            backends.names(),
            vec!["defaults", "app", "credentials", "env", "db"]
        );
        assert_eq!(backends.position("db"), Some(4));
        assert_eq!(backends.len(), 5);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut backends = BackendCollection::new();
        backends.push("app", backend("app")).unwrap();

        for result in [
            backends.push("app", backend("x")),
            backends.unshift("app", backend("x")),
            backends.insert_after("app", "app", backend("x")),
        ] {
            assert!(matches!(result, Err(ConfigError::DuplicateName(ref n)) if n == "app"));
        }
        assert_eq!(backends.len(), 1);
    }

    #[test]
    fn test_missing_anchor_rejected() {
        let mut backends = BackendCollection::new();
        let err = backends.insert_before("env", "db", backend("db")).unwrap_err();
        assert_eq!(err.to_string(), "env is not set");
        let err = backends.insert_after("env", "db", backend("db")).unwrap_err();
        assert!(matches!(err, ConfigError::NameNotFound(_)));
        assert!(backends.is_empty());
    }

    #[test]
    fn test_delete_and_lookup() {
        let mut backends = BackendCollection::new();
        backends.push("app", backend("app-source")).unwrap();
        assert_eq!(backends.lookup("app").unwrap().source(), "app-source");
        assert!(backends.lookup("env").is_none());

        let removed = backends.delete("app").unwrap();
        assert_eq!(removed.source(), "app-source");
        assert!(matches!(backends.delete("app"), Err(ConfigError::NameNotFound(_))));
    }

    #[test]
    fn test_fresh_all() {
        let mut backends = BackendCollection::new();
        assert!(backends.fresh_all());

        let stale = Arc::new(StaticBackend::new("stale", json!({})));
        backends.push("fresh", backend("fresh")).unwrap();
        backends.push("stale", stale.clone()).unwrap();
        assert!(backends.fresh_all());

        stale.replace(json!({"a": 1}));
        assert!(!backends.fresh_all());
    }
}
