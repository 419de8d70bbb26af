//! Environment-variable backend.
//!
//! Variable names are lowercased. Only whitelisted variables are exposed
//! unless `allow_all` is set; with `nest` enabled, `DB_POOL_SIZE` becomes
//! `db.pool.size`.

use super::Backend;
use super::nest::nest_keys;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default separator used when nesting variable names.
pub const DEFAULT_ENV_SEPARATOR: &str = "_";

/// Which variables to expose and how to shape them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvOptions {
    /// Expose every variable.
    #[serde(default)]
    pub allow_all: bool,

    /// Exact variable names to expose (case-insensitive).
    #[serde(default)]
    pub whitelist_keys: Vec<String>,

    /// Expose every variable starting with one of these prefixes.
    #[serde(default)]
    pub whitelist_prefixes: Vec<String>,

    /// Split names on the separator into nested maps.
    #[serde(default)]
    pub nest: bool,

    /// Separator for `nest` (default `_`).
    #[serde(default)]
    pub nest_separator: Option<String>,
}

/// Backend over the process environment, or over a fixed set of variables.
#[derive(Debug, Clone)]
pub struct EnvVars {
    options: EnvOptions,
    vars: Option<BTreeMap<String, String>>,
}

impl EnvVars {
    /// Read the live process environment on every load.
    pub fn new(options: EnvOptions) -> Self {
        Self {
            options,
            vars: None,
        }
    }

    /// Serve a fixed set of variables instead of the process environment.
    pub fn with_vars<I, K, V>(options: EnvOptions, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            options,
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    fn downcased(&self) -> BTreeMap<String, String> {
        match &self.vars {
            Some(vars) => vars
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
            None => std::env::vars()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    fn filtered(&self) -> BTreeMap<String, String> {
        let all = self.downcased();
        if self.options.allow_all {
            return all;
        }

        let keys: Vec<String> = self
            .options
            .whitelist_keys
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        let prefixes: Vec<String> = self
            .options
            .whitelist_prefixes
            .iter()
            .map(|p| p.to_lowercase())
            .collect();

        all.into_iter()
            .filter(|(name, _)| {
                keys.iter().any(|k| k == name) || prefixes.iter().any(|p| name.starts_with(p))
            })
            .collect()
    }
}

impl Backend for EnvVars {
    fn load_keys(&self) -> anyhow::Result<Map<String, Value>> {
        let flat: Map<String, Value> = self
            .filtered()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        if !self.options.nest {
            return Ok(flat);
        }
        let separator = self
            .options
            .nest_separator
            .as_deref()
            .unwrap_or(DEFAULT_ENV_SEPARATOR);
        Ok(nest_keys(flat, separator))
    }

    fn source(&self) -> String {
        "env".to_string()
    }
}
