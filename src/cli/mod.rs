//! CLI command definitions for layered-config
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use crate::backend::{BackendCollection, EnvVars, SettingsStore, YamlFile};
use crate::configuration::Configuration;
use crate::error::{ConfigError, ConfigResult};
use crate::node::{ConfigNode, Key};
use crate::options::Options;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

/// Output format for `dump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DumpFormat {
    #[default]
    Json,
    Yaml,
}

/// Inspect a configuration merged from YAML files, environment variables and a
/// settings database
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML file to merge, in order (relative to --root)
    #[arg(long = "yaml", value_name = "FILE", global = true)]
    pub yaml: Vec<PathBuf>,

    /// YAML file merged last, after environment variables
    #[arg(long, value_name = "FILE", global = true)]
    pub local: Option<PathBuf>,

    /// Expose environment variables starting with this prefix
    #[arg(long = "env-prefix", value_name = "PREFIX", global = true)]
    pub env_prefix: Vec<String>,

    /// Expose every environment variable
    #[arg(long, global = true)]
    pub env_all: bool,

    /// Nest environment variable names on '_'
    #[arg(long, global = true)]
    pub env_nest: bool,

    /// SQLite database holding a settings table
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    /// Environment section to read from YAML files
    #[arg(short, long, global = true)]
    pub environment: Option<String>,

    /// Directory relative paths are resolved against
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value at a dotted path
    Get {
        /// Dotted path; numeric segments index sequences
        path: String,

        /// Fail when the value is blank
        #[arg(long)]
        strict: bool,
    },

    /// Print which backend supplied the value at a dotted path
    Source {
        /// Dotted path; numeric segments index sequences
        path: String,
    },

    /// Print the whole merged configuration
    Dump {
        #[arg(short, long, value_enum, default_value_t = DumpFormat::Json)]
        format: DumpFormat,
    },

    /// List registered backends in merge order
    Backends,
}

impl Cli {
    /// Discovered options with command-line overrides applied.
    pub fn options(&self) -> Options {
        let mut options = Options::discover();
        if let Some(root) = &self.root {
            options.root = root.clone();
        }
        if let Some(environment) = &self.environment {
            options.environment = environment.clone();
        }
        let env = &mut options.env_backend;
        env.allow_all |= self.env_all;
        env.nest |= self.env_nest;
        env.whitelist_prefixes.extend(self.env_prefix.iter().cloned());
        options
    }

    /// Build the configuration described by the arguments.
    ///
    /// YAML files come first, then environment variables, then the local
    /// file. The settings database is added afterwards, right after the
    /// environment backend.
    pub fn configuration(&self, options: Options) -> anyhow::Result<Configuration> {
        let config = Configuration::with_options(options.clone());
        config.init(|backends| {
            for (index, path) in self.yaml.iter().enumerate() {
                let name = if index == 0 {
                    "app".to_string()
                } else {
                    format!("app_{}", index)
                };
                backends.push(name, Arc::new(YamlFile::from_options(path, &options)))?;
            }
            backends.push("env", Arc::new(EnvVars::new(options.env_backend.clone())))?;
            if let Some(local) = &self.local {
                backends.push("app_local", Arc::new(YamlFile::from_options(local, &options)))?;
            }
            Ok(())
        })?;

        if let Some(db) = &self.db {
            let store = SettingsStore::open(options.resolve(db), options.settings_backend.clone())?;
            config.refine(|backends| add_settings(backends, store))?;
        }
        Ok(config)
    }
}

/// Value at a dotted path for `get`. With `strict`, a blank value is reported
/// as not set.
pub fn lookup(config: &Configuration, path: &str, strict: bool) -> ConfigResult<ConfigNode> {
    let node = config.dig_strict(Key::path(path))?;
    if strict && node.is_blank() {
        return Err(ConfigError::key_not_found(path));
    }
    Ok(node)
}

/// Place the settings store right after `env`, or last when there is none.
pub fn add_settings(
    backends: &mut BackendCollection,
    store: SettingsStore,
) -> ConfigResult<()> {
    if backends.lookup("env").is_some() {
        backends.insert_after("env", "db", Arc::new(store))
    } else {
        backends.push("db", Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SettingsOptions, StaticBackend};
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from([
            "layered-config",
            "--yaml",
            "config/app.yml",
            "--yaml",
            "config/extra.yml",
            "--env-prefix",
            "APP_",
            "-e",
            "production",
            "get",
            "server.port",
            "--strict",
        ]);
        assert_eq!(cli.yaml.len(), 2);
        assert_eq!(cli.env_prefix, vec!["APP_".to_string()]);
        assert_eq!(cli.log, "2");
        assert!(matches!(cli.command, Command::Get { ref path, strict: true } if path == "server.port"));
        assert_eq!(cli.options().environment, "production");
    }

    #[test]
    fn test_dump_format() {
        let cli = Cli::parse_from(["layered-config", "dump", "--format", "yaml"]);
        assert!(matches!(cli.command, Command::Dump { format: DumpFormat::Yaml }));
    }

    #[test]
    fn test_strict_lookup_rejects_blank() {
        let config = Configuration::new();
        config
            .init(|backends| {
                backends.push("app", Arc::new(StaticBackend::new("app", json!({"a": {"b": " ", "c": 1}}))))
            })
            .unwrap();

        assert!(lookup(&config, "a.b", false).is_ok());
        let err = lookup(&config, "a.b", true).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Configuration key 'a.b' is not set");
        assert_eq!(lookup(&config, "a.c", true).unwrap().as_i64(), Some(1));
        assert_eq!(
            lookup(&config, "a.x", true).unwrap_err().to_string(),
            "Configuration key 'a.x' is not set"
        );
    }

    #[test]
    fn test_add_settings_position() {
        let store = || SettingsStore::open_in_memory(SettingsOptions::default()).unwrap();
        let mut backends = BackendCollection::new();
        backends.push("app", Arc::new(StaticBackend::new("app", json!({})))).unwrap();
        backends.push("env", Arc::new(StaticBackend::new("env", json!({})))).unwrap();
        backends.push("app_local", Arc::new(StaticBackend::new("local", json!({})))).unwrap();
        add_settings(&mut backends, store()).unwrap();
        assert_eq!(backends.names(), vec!["app", "env", "db", "app_local"]);

        let mut backends = BackendCollection::new();
        backends.push("app", Arc::new(StaticBackend::new("app", json!({})))).unwrap();
        add_settings(&mut backends, store()).unwrap();
        assert_eq!(backends.names(), vec!["app", "db"]);
    }
}
