//! Configuration coordinator.
//!
//! Owns the backend registry and the last merged tree. Every read first asks
//! the backends whether they are still fresh and rebuilds the tree when one of
//! them is not, so callers always see current data without polling.
//!
//! ```no_run
//! use layered_config::backend::{EnvOptions, EnvVars, YamlFile};
//! use layered_config::{Configuration, Options};
//! use std::sync::Arc;
//!
//! let options = Options::discover();
//! let config = Configuration::with_options(options.clone());
//! config.init(|backends| {
//!     backends.push("app", Arc::new(YamlFile::from_options("config/app.yml", &options)))?;
//!     backends.push("env", Arc::new(EnvVars::new(EnvOptions::default())))?;
//!     Ok(())
//! })?;
//! let host = config.fetch("host")?;
//! # Ok::<(), layered_config::ConfigError>(())
//! ```

use crate::backend::BackendCollection;
use crate::error::{ConfigError, ConfigResult};
use crate::expression;
use crate::node::{ConfigNode, Key};
use crate::options::Options;
use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Merged view over an ordered set of backends.
///
/// Rebuilds are serialized by an internal lock; readers work on an immutable
/// snapshot published through `ArcSwap`.
pub struct Configuration {
    options: Options,
    backends: Mutex<Option<BackendCollection>>,
    merged: ArcSwap<ConfigNode>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            options,
            backends: Mutex::new(None),
            merged: ArcSwap::from_pointee(ConfigNode::empty()),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    // Registry

    /// Install a registry built by `setup` and merge it.
    ///
    /// The registry replaces any previous one only if `setup` and the merge
    /// both succeed.
    pub fn init<F>(&self, setup: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut BackendCollection) -> ConfigResult<()>,
    {
        let mut backends = BackendCollection::new();
        setup(&mut backends)?;

        let mut guard = self.lock();
        self.rebuild(&backends)?;
        *guard = Some(backends);
        Ok(())
    }

    /// Edit the installed registry and merge it.
    ///
    /// `setup` works on a copy, committed only if it and the merge succeed.
    /// The registry lock is held throughout, so concurrent refinements apply
    /// one after the other and `setup` must not read from this configuration.
    pub fn refine<F>(&self, setup: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut BackendCollection) -> ConfigResult<()>,
    {
        let mut guard = self.lock();
        let mut backends = guard.clone().ok_or(ConfigError::Uninitialized)?;
        setup(&mut backends)?;

        self.rebuild(&backends)?;
        *guard = Some(backends);
        Ok(())
    }

    /// Merge again regardless of freshness.
    pub fn reload(&self) -> ConfigResult<()> {
        let guard = self.lock();
        let backends = guard.as_ref().ok_or(ConfigError::Uninitialized)?;
        self.rebuild(backends)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Registered backend names in merge order.
    pub fn backend_names(&self) -> ConfigResult<Vec<String>> {
        let guard = self.lock();
        let backends = guard.as_ref().ok_or(ConfigError::Uninitialized)?;
        Ok(backends.names().into_iter().map(str::to_string).collect())
    }

    // Reads

    /// Current merged tree, rebuilt first if any backend is stale.
    pub fn snapshot(&self) -> ConfigResult<Arc<ConfigNode>> {
        self.current()
    }

    pub fn get(&self, key: impl Into<Key>) -> ConfigResult<Option<ConfigNode>> {
        Ok(self.current()?.get(key).cloned())
    }

    pub fn fetch(&self, key: impl Into<Key>) -> ConfigResult<ConfigNode> {
        self.current()?.fetch(key).cloned()
    }

    pub fn fetch_or(&self, key: impl Into<Key>, default: ConfigNode) -> ConfigResult<ConfigNode> {
        Ok(self.current()?.get(key).cloned().unwrap_or(default))
    }

    pub fn dig<I, K>(&self, keys: I) -> ConfigResult<Option<ConfigNode>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Ok(self.current()?.dig(keys).cloned())
    }

    pub fn dig_strict<I, K>(&self, keys: I) -> ConfigResult<ConfigNode>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.current()?.dig_strict(keys).cloned()
    }

    pub fn source<I, K>(&self, keys: I) -> ConfigResult<String>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.current()?.source(keys)
    }

    pub fn require(&self, key: impl Into<Key>) -> ConfigResult<ConfigNode> {
        self.current()?.require(key).cloned()
    }

    pub fn is_present(&self, key: impl Into<Key>) -> ConfigResult<bool> {
        Ok(self.current()?.is_present(key))
    }

    /// Deserialize the sub-tree at `keys` (the whole tree when empty).
    pub fn extract<T, I, K>(&self, keys: I) -> ConfigResult<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.current()?.dig_strict(keys)?.deserialize()
    }

    // Internals

    fn lock(&self) -> MutexGuard<'_, Option<BackendCollection>> {
        self.backends.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Freshness gate shared by every read.
    fn current(&self) -> ConfigResult<Arc<ConfigNode>> {
        let guard = self.lock();
        let backends = guard.as_ref().ok_or(ConfigError::Uninitialized)?;
        if !backends.fresh_all() {
            debug!("Stale backend detected, reloading configuration");
            self.rebuild(backends)?;
        }
        Ok(self.merged.load_full())
    }

    /// Fold every backend into a new tree and publish it. On failure the
    /// previous tree stays in place.
    fn rebuild(&self, backends: &BackendCollection) -> ConfigResult<()> {
        let mut tree = ConfigNode::empty();
        for entry in backends.entries() {
            let backend = entry.backend();
            let keys = backend.load_keys().map_err(|source| ConfigError::Backend {
                source_name: entry.name().to_string(),
                source,
            })?;
            debug!(backend = %entry.name(), keys = keys.len(), "Merging backend");
            tree.deep_merge_in_place(ConfigNode::from_map(keys, &backend.source()));
        }
        tree.strip_append_sentinels();
        expression::resolve_all(&mut tree, &self.options.root_alias)?;

        info!(
            "Configuration loaded from {} backend(s): {}",
            backends.len(),
            backends.names().join(", ")
        );
        self.merged.store(Arc::new(tree));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, StaticBackend};
    use serde_json::json;

    fn static_backend(label: &str, data: serde_json::Value) -> Arc<dyn Backend> {
        Arc::new(StaticBackend::new(label, data))
    }

    #[test]
    fn test_reads_before_init_fail() {
        let config = Configuration::new();
        assert!(!config.is_initialized());
        assert!(matches!(config.get("a"), Err(ConfigError::Uninitialized)));
        assert!(matches!(config.reload(), Err(ConfigError::Uninitialized)));
        assert!(matches!(config.refine(|_| Ok(())), Err(ConfigError::Uninitialized)));
    }

    #[test]
    fn test_init_merges_in_order() {
        let config = Configuration::new();
        config
            .init(|backends| {
                backends.push("a", static_backend("A", json!({"x": 1, "y": 1})))?;
                backends.push("b", static_backend("B", json!({"y": 2})))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(config.fetch("x").unwrap().as_i64(), Some(1));
        assert_eq!(config.fetch("y").unwrap().as_i64(), Some(2));
        assert_eq!(config.source(["y"]).unwrap(), "B y");
        assert_eq!(config.backend_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_setup_keeps_previous_registry() {
        let config = Configuration::new();
        config
            .init(|backends| backends.push("a", static_backend("A", json!({"x": 1}))))
            .unwrap();

        let err = config
            .refine(|backends| backends.insert_after("missing", "b", static_backend("B", json!({}))))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NameNotFound(_)));
        assert_eq!(config.backend_names().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_stale_backend_triggers_rebuild() {
        let data = Arc::new(StaticBackend::new("data", json!({"x": 1})));
        let config = Configuration::new();
        let registered = data.clone();
        config
            .init(move |backends| backends.push("data", registered))
            .unwrap();
        assert_eq!(config.fetch("x").unwrap().as_i64(), Some(1));

        data.replace(json!({"x": 2}));
        assert_eq!(config.fetch("x").unwrap().as_i64(), Some(2));
    }

    #[test]
    fn test_extract_typed() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Server {
            host: String,
            port: u16,
        }

        let config = Configuration::new();
        config
            .init(|backends| {
                backends.push(
                    "app",
                    static_backend("app", json!({"server": {"host": "localhost", "port": 80}})),
                )
            })
            .unwrap();

        let server: Server = config.extract(["server"]).unwrap();
        assert_eq!(
            server,
            Server {
                host: "localhost".into(),
                port: 80
            }
        );
        let err = config.extract::<Server, _, _>(["missing"]).unwrap_err();
        assert_eq!(err.to_string(), "Configuration key 'missing' is not set");
    }
}
