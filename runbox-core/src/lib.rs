//! Core shared library for Runbox.
//!
//! Exposes the primitives every crate in the workspace depends on: the
//! error taxonomy, configuration loading and logging setup.

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{CredentialsConfig, RunboxConfig};
pub use errors::{ConfigError, ErrorKind, RunboxError};
