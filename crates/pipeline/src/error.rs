//! Error types for pipeline generation and emission.

use std::collections::BTreeSet;

use miette::Diagnostic;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that stop a pipeline from being generated or emitted.
///
/// Every variant names the offending steps or secrets.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum PipelineError {
    /// Two candidate steps share a name.
    #[error("Step '{step}' is defined more than once")]
    #[diagnostic(code(launchpad::pipeline::duplicate_step))]
    DuplicateStep {
        /// Step name
        step: String,
    },

    /// Steps depend on names that are not in the catalog.
    #[error("Unknown step dependencies: {}", format_missing(.missing))]
    #[diagnostic(code(launchpad::pipeline::missing_dependency))]
    MissingDependencies {
        /// `(step, dependency)` pairs
        missing: Vec<(String, String)>,
    },

    /// The selected steps do not form a DAG.
    #[error("Cycle detected between steps: {}", .steps.join(", "))]
    #[diagnostic(code(launchpad::pipeline::cycle))]
    CycleDetected {
        /// Steps that take part in a cycle, sorted
        steps: Vec<String>,
    },

    /// Selected steps reference secrets that have not been resolved.
    #[error("Pipeline references unresolved secrets: {}", join(.missing))]
    #[diagnostic(
        code(launchpad::pipeline::unresolved_secrets),
        help("Supply a value under [secrets.supplied] in launchpad.toml and publish again")
    )]
    UnresolvedSecrets {
        /// Secret names missing from the resolved set
        missing: BTreeSet<String>,
    },

    /// The rendered workflow contains secret expressions outside the resolved set.
    #[error("Rendered workflow references undeclared secrets: {}", join(.names))]
    #[diagnostic(code(launchpad::pipeline::undeclared_secret_expression))]
    UndeclaredSecretExpressions {
        /// Secret names found in `${{ secrets.* }}` expressions
        names: BTreeSet<String>,
    },

    /// YAML rendering failed.
    #[error("Failed to render workflow: {message}")]
    #[diagnostic(code(launchpad::pipeline::render))]
    Render {
        /// Serializer message
        message: String,
    },
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn format_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(step, dep)| format!("'{step}' depends on '{dep}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
