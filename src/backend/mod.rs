//! Configuration data sources.
//!
//! A backend produces a (possibly nested) key map, names itself for provenance
//! labels, and reports whether the data it last produced is still current.
//!
//! Shipped backends:
//! - [`YamlFile`] - `default` section merged with an environment section
//! - [`EnvVars`] - filtered, lowercased process environment
//! - [`SettingsStore`] - typed `settings` table in SQLite
//! - [`StaticBackend`] - in-memory data supplied by the host

mod collection;
pub mod env;
pub mod memory;
pub mod nest;
pub mod settings;
pub mod watcher;
pub mod yaml;

use serde_json::{Map, Value};

pub use collection::{BackendCollection, BackendEntry};
pub use env::{EnvOptions, EnvVars};
pub use memory::StaticBackend;
pub use settings::{SettingType, SettingsOptions, SettingsStore};
pub use yaml::YamlFile;

/// A named source of configuration keys.
///
/// `is_fresh` is probed before reads; it only has to be safe, not exact.
/// When in doubt an implementation should answer `true` and keep serving the
/// last merge.
pub trait Backend: Send + Sync {
    /// Produce the backend's current keys.
    fn load_keys(&self) -> anyhow::Result<Map<String, Value>>;

    /// Stable label recorded against every value this backend contributes.
    fn source(&self) -> String;

    /// Whether the keys returned by the last `load_keys` are still current.
    fn is_fresh(&self) -> bool {
        true
    }
}
