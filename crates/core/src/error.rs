//! Error types for shared models and configuration.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::resource::{ResourceKind, ResourceState};

/// Result type alias using the core error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or mutating shared models.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    #[diagnostic(
        code(launchpad::config::read_failed),
        help("Pass --config to point at an existing launchpad.toml")
    )]
    ConfigRead {
        /// Path that was read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::DeployConfig`].
    #[error("Failed to parse configuration file {path}: {message}")]
    #[diagnostic(code(launchpad::config::parse_failed))]
    ConfigParse {
        /// Path that was parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A configuration value is out of range or malformed.
    #[error("Invalid configuration value for '{field}': {message}")]
    #[diagnostic(code(launchpad::config::invalid))]
    InvalidConfig {
        /// Dotted name of the offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A resource was asked to move to a state its lifecycle does not allow.
    #[error("Illegal state transition for {kind} '{logical_name}': {from} -> {to}")]
    #[diagnostic(code(launchpad::resource::invalid_transition))]
    InvalidTransition {
        /// Resource kind
        kind: ResourceKind,
        /// Logical name of the resource
        logical_name: String,
        /// Current state
        from: ResourceState,
        /// Requested state
        to: ResourceState,
    },
}

impl Error {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}
