//! Provisioning errors.

use launchpad_core::InfrastructureResource;
use miette::Diagnostic;
use thiserror::Error;

use crate::client::CloudError;

/// Why provisioning stopped.
#[derive(Error, Debug, Diagnostic)]
pub enum ProvisionError {
    /// The caller may not perform an operation. Never retried.
    #[error("Permission denied while trying to {operation}: {message}")]
    #[diagnostic(
        code(launchpad::provision::permission_denied),
        help("Grant the authenticated account IAM admin rights on the project, then re-run")
    )]
    PermissionDenied {
        /// Operation that was refused
        operation: String,
        /// Provider message, verbatim
        message: String,
    },

    /// A resource did not converge within the retry budget, or the provider
    /// rejected a call outright.
    #[error("Failed to provision {resource}: {last_error}")]
    #[diagnostic(
        code(launchpad::provision::failed),
        help("Re-running is safe: resources that already exist are reused")
    )]
    Provisioning {
        /// Resource being provisioned
        resource: String,
        /// Attempts made on the failing call
        attempts: u32,
        /// Last error from the provider
        last_error: CloudError,
    },

    /// A resource was driven through an illegal lifecycle transition.
    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] launchpad_core::Error),
}

/// A failed run together with everything that converged before it.
#[derive(Debug)]
pub struct ProvisionFailure {
    /// What went wrong
    pub error: ProvisionError,
    /// Resources converged so far; the failing one is marked FAILED
    pub resources: Vec<InfrastructureResource>,
}

impl std::fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} resource(s) converged)",
            self.error,
            self.resources.iter().filter(|r| r.is_present()).count()
        )
    }
}

impl std::error::Error for ProvisionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result type for the provisioner.
pub type Result<T> = std::result::Result<T, ProvisionError>;
