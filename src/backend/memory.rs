//! In-memory backend for host-supplied defaults and overrides.

use super::Backend;
use anyhow::bail;
use serde_json::{Map, Value};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Backend serving a JSON mapping held in memory.
///
/// Replacing the data marks the backend stale until the next load.
pub struct StaticBackend {
    label: String,
    data: RwLock<Value>,
    stale: AtomicBool,
}

impl StaticBackend {
    pub fn new(label: impl Into<String>, data: Value) -> Self {
        Self {
            label: label.into(),
            data: RwLock::new(data),
            stale: AtomicBool::new(false),
        }
    }

    /// Swap in new data; the next freshness probe reports stale.
    pub fn replace(&self, data: Value) {
        let mut guard = self.data.write().unwrap_or_else(|e| e.into_inner());
        *guard = data;
        self.stale.store(true, Ordering::SeqCst);
    }
}

impl Backend for StaticBackend {
    fn load_keys(&self) -> anyhow::Result<Map<String, Value>> {
        self.stale.store(false, Ordering::SeqCst);
        let guard = self.data.read().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            Value::Object(map) => Ok(map.clone()),
            Value::Null => Ok(Map::new()),
            other => bail!("{} must hold a mapping, found {}", self.label, other),
        }
    }

    fn source(&self) -> String {
        self.label.clone()
    }

    fn is_fresh(&self) -> bool {
        !self.stale.load(Ordering::SeqCst)
    }
}
