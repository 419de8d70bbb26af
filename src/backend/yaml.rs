//! YAML file backend.
//!
//! A file holds one section per environment plus a `default` section:
//!
//! ```yaml
//! default:
//!   server: { host: localhost, port: 8080 }
//! production:
//!   server: { host: example.com }
//! ```
//!
//! Loading merges the environment section over `default`. A missing file
//! yields no keys.

use super::Backend;
use super::nest::deep_merge;
use super::watcher::FileWatch;
use crate::options::Options;
use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Name of the section every environment inherits from.
pub const DEFAULT_SECTION: &str = "default";

/// Backend reading one YAML file.
pub struct YamlFile {
    path: PathBuf,
    environment: String,
    watch: Option<FileWatch>,
    /// Modification time seen by the last load; `Some(None)` means the file
    /// was absent.
    loaded: Mutex<Option<Option<SystemTime>>>,
}

impl YamlFile {
    pub fn new(path: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
            watch: None,
            loaded: Mutex::new(None),
        }
    }

    /// File relative to the configured root, for the configured environment.
    pub fn from_options(relative: impl AsRef<Path>, options: &Options) -> Self {
        Self::new(options.resolve(relative), options.environment.clone())
    }

    /// Use a file watcher instead of modification times to detect changes.
    pub fn watched(mut self) -> Result<Self, notify::Error> {
        self.watch = Some(FileWatch::start(self.path.clone())?);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn read(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut yaml: serde_yaml::Value = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        yaml.apply_merge()
            .with_context(|| format!("Failed to resolve merge keys in {}", self.path.display()))?;

        let mut sections = match serde_json::to_value(yaml)? {
            Value::Object(map) => map,
            Value::Null => return Ok(Map::new()),
            other => bail!(
                "{} must contain a mapping of sections, found {}",
                self.path.display(),
                other
            ),
        };

        let defaults = take_section(&mut sections, DEFAULT_SECTION);
        let current = take_section(&mut sections, &self.environment);
        match deep_merge(defaults, current) {
            Value::Object(map) => Ok(map),
            other => bail!(
                "{}: section '{}' must be a mapping, found {}",
                self.path.display(),
                self.environment,
                other
            ),
        }
    }
}

fn take_section(sections: &mut Map<String, Value>, name: &str) -> Value {
    match sections.remove(name) {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(section) => section,
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl Backend for YamlFile {
    fn load_keys(&self) -> Result<Map<String, Value>> {
        if let Some(watch) = &self.watch {
            watch.reset();
        }
        let stamp = modified(&self.path);
        let keys = self.read();
        // Recorded even when parsing fails, so a broken file is retried only
        // after it changes again.
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = Some(stamp);
        keys
    }

    fn source(&self) -> String {
        format!("yaml:{}", self.path.display())
    }

    fn is_fresh(&self) -> bool {
        let loaded = *self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        match (loaded, &self.watch) {
            (None, _) => false,
            (Some(_), Some(watch)) => !watch.has_changed(),
            (Some(stamp), None) => stamp == modified(&self.path),
        }
    }
}
