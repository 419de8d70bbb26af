//! Settings of the resolver itself.

use crate::backend::{EnvOptions, SettingsOptions};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`Options::root`].
pub const ROOT_VAR: &str = "LAYERED_CONFIG_ROOT";
/// Environment variable overriding [`Options::environment`].
pub const ENVIRONMENT_VAR: &str = "LAYERED_CONFIG_ENV";
/// Environment variable overriding [`Options::root_alias`].
pub const ALIAS_VAR: &str = "LAYERED_CONFIG_ALIAS";

/// Resolver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Directory relative file paths are resolved against.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Environment section selected in YAML files.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Name deferred expressions use for the configuration root.
    #[serde(default = "default_root_alias")]
    pub root_alias: String,

    /// Options for the environment-variable backend.
    #[serde(default)]
    pub env_backend: EnvOptions,

    /// Options for the settings-store backend.
    #[serde(default = "default_settings_backend")]
    pub settings_backend: SettingsOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            root: default_root(),
            environment: default_environment(),
            root_alias: default_root_alias(),
            env_backend: EnvOptions::default(),
            settings_backend: default_settings_backend(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_root_alias() -> String {
    "AppConfig".to_string()
}

fn default_settings_backend() -> SettingsOptions {
    SettingsOptions {
        nest: true,
        ..Default::default()
    }
}

impl Options {
    /// Defaults overridden by `LAYERED_CONFIG_*` environment variables.
    pub fn discover() -> Self {
        Self::discover_from(|name| std::env::var(name).ok())
    }

    /// Like [`discover`](Self::discover), reading variables through `lookup`.
    pub fn discover_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(root) = lookup(ROOT_VAR).filter(|v| !v.is_empty()) {
            options.root = PathBuf::from(root);
        }
        if let Some(environment) = lookup(ENVIRONMENT_VAR).filter(|v| !v.is_empty()) {
            options.environment = environment;
        }
        if let Some(alias) = lookup(ALIAS_VAR).filter(|v| !v.is_empty()) {
            options.root_alias = alias;
        }
        options
    }

    /// Load options from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Options = serde_yaml::from_str(&content)?;
        Ok(options)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_root_alias(mut self, alias: impl Into<String>) -> Self {
        self.root_alias = alias.into();
        self
    }

    pub fn with_env_backend(mut self, env_backend: EnvOptions) -> Self {
        self.env_backend = env_backend;
        self
    }

    pub fn with_settings_backend(mut self, settings_backend: SettingsOptions) -> Self {
        self.settings_backend = settings_backend;
        self
    }

    /// `path` resolved against the root unless already absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.root, PathBuf::from("."));
        assert_eq!(options.environment, "development");
        assert_eq!(options.root_alias, "AppConfig");
        assert!(options.settings_backend.nest);
        assert!(!options.env_backend.allow_all);
    }

    #[test]
    fn test_discover_from_variables() {
        let vars: HashMap<&str, &str> = [
            (ROOT_VAR, "/srv/app"),
            (ENVIRONMENT_VAR, "production"),
            (ALIAS_VAR, ""),
        ]
        .into_iter()
        .collect();
        let options = Options::discover_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(options.root, PathBuf::from("/srv/app"));
        assert_eq!(options.environment, "production");
        assert_eq!(options.root_alias, "AppConfig", "empty values are ignored");
    }

    #[test]
    fn test_load_partial_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("layered.yaml");
        std::fs::write(
            &path,
            "environment: test\nenv_backend:\n  whitelist_prefixes: [app_]\n  nest: true\n",
        )
        .unwrap();

        let options = Options::load(&path).unwrap();
        assert_eq!(options.environment, "test");
        assert_eq!(options.root_alias, "AppConfig");
        assert_eq!(options.env_backend.whitelist_prefixes, vec!["app_".to_string()]);
        assert!(options.env_backend.nest);
        assert!(options.settings_backend.nest);
    }

    #[test]
    fn test_resolve() {
        let options = Options::default().with_root("/srv/app");
        assert_eq!(options.resolve("config/app.yml"), PathBuf::from("/srv/app/config/app.yml"));
        assert_eq!(options.resolve("/etc/app.yml"), PathBuf::from("/etc/app.yml"));
    }
}
