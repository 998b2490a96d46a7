//! CLI error types and exit code mapping.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::orchestrator::OrchestrationFailure;

/// Successful exit code
pub const EXIT_OK: i32 = 0;
/// CLI or configuration error exit code
pub const EXIT_CLI: i32 = 2;
/// A run stage or artifact write failed
pub const EXIT_RUN: i32 = 3;

/// Errors surfaced by CLI commands.
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] launchpad_core::Error),

    /// A run stopped at a fatal stage.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Run(#[from] OrchestrationFailure),

    /// An artifact could not be written.
    #[error("Failed to {operation} {path}")]
    #[diagnostic(
        code(launchpad::cli::file_error),
        help("Check file permissions and ensure the project directory exists")
    )]
    FileError {
        /// What was attempted
        operation: String,
        /// Path involved
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A command that calls external services was started without a runtime.
    #[error("The {command} command needs the async runtime")]
    #[diagnostic(code(launchpad::cli::runtime_required))]
    RuntimeRequired {
        /// Command name
        command: &'static str,
    },

    /// Command output could not be serialized.
    #[error("Failed to serialize {what}")]
    #[diagnostic(code(launchpad::cli::serialize))]
    Serialize {
        /// What was being serialized
        what: &'static str,
        /// Underlying serializer error
        #[source]
        source: serde_json::Error,
    },
}

impl CliError {
    /// Create a file error.
    pub fn file_error(
        operation: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileError {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// What converged before the failure, for run errors.
    #[must_use]
    pub fn converged_summary(&self) -> Vec<String> {
        match self {
            Self::Run(failure) => failure.converged.summary(),
            _ => Vec::new(),
        }
    }
}

/// Process exit code for `err`.
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config(_) | CliError::RuntimeRequired { .. } => EXIT_CLI,
        CliError::Run(_) | CliError::FileError { .. } | CliError::Serialize { .. } => EXIT_RUN,
    }
}
