//! Layered configuration resolver.
//!
//! Merges configuration from an ordered set of backends (YAML files,
//! environment variables, a SQLite settings table, in-memory data) into one
//! tree that remembers which backend supplied every value. Reads re-merge
//! automatically when a backend reports that its data changed.

pub mod backend;
pub mod cli;
pub mod configuration;
pub mod error;
pub mod expression;
pub mod logging;
pub mod node;
pub mod options;

pub use backend::{Backend, BackendCollection};
pub use configuration::Configuration;
pub use error::{ConfigError, ConfigResult};
pub use node::{ConfigNode, Key};
pub use options::Options;
