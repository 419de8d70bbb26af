//! Error types for configuration lookup, registry setup and reloads.

use thiserror::Error;

/// Errors raised by the merged tree, the backend registry and the coordinator.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Strict lookup missed an object key.
    #[error("Configuration key '{path}' is not set")]
    KeyNotFound { path: String },

    /// Strict lookup ran past the end of a sequence.
    #[error("Configuration key '{path}' is not set")]
    IndexOutOfRange { path: String },

    /// A backend with this name is already registered.
    #[error("{0} is already set")]
    DuplicateName(String),

    /// No backend with this name is registered.
    #[error("{0} is not set")]
    NameNotFound(String),

    /// A backend failed to produce its keys.
    #[error("Failed to load keys from {source_name}: {source}")]
    Backend {
        source_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A deferred expression could not be evaluated.
    #[error("Cannot evaluate '{expression}' at '{path}': {message}")]
    Expression {
        path: String,
        expression: String,
        message: String,
    },

    /// The configuration was read before `init` installed any backends.
    #[error("Configuration has not been initialized")]
    Uninitialized,

    /// Typed extraction of a sub-tree failed.
    #[error("Failed to deserialize configuration: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn key_not_found(path: impl Into<String>) -> Self {
        Self::KeyNotFound { path: path.into() }
    }

    pub fn index_out_of_range(path: impl Into<String>) -> Self {
        Self::IndexOutOfRange { path: path.into() }
    }

    /// True for the two "value is not there" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ConfigError::KeyNotFound { .. } | ConfigError::IndexOutOfRange { .. }
        )
    }

    /// Dotted path carried by lookup failures.
    pub fn path(&self) -> Option<&str> {
        match self {
            ConfigError::KeyNotFound { path }
            | ConfigError::IndexOutOfRange { path }
            | ConfigError::Expression { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
