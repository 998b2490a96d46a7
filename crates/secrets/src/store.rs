//! Contract with the remote secret store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::SecretValue;

/// Errors reported by a secret store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Existing secret names could not be listed.
    #[error("Failed to list secrets in {target}: {message}")]
    #[diagnostic(
        code(launchpad::secrets::list_failed),
        help("Check that the CLI is authenticated and can administer the repository")
    )]
    ListFailed {
        /// Store target, e.g. a repository
        target: String,
        /// Store message
        message: String,
    },

    /// A single secret could not be written.
    #[error("Failed to write secret '{name}': {message}")]
    #[diagnostic(code(launchpad::secrets::write_failed))]
    WriteFailed {
        /// Secret name
        name: String,
        /// Store message
        message: String,
    },

    /// The store call did not finish in time.
    #[error("Secret store call '{operation}' timed out after {seconds}s")]
    #[diagnostic(code(launchpad::secrets::timeout))]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout in seconds
        seconds: u64,
    },
}

/// A named-secret store scoped to one target, such as a repository.
#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// Human-readable target, used in logs and errors.
    fn target(&self) -> String;

    /// Names of secrets already stored.
    async fn list(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Create or replace a secret.
    async fn write(&self, name: &str, value: &SecretValue) -> Result<(), StoreError>;
}
