//! launchpad: from a source tree to a deployable CI pipeline.
//!
//! The binary wires the stage crates together:
//!
//! - [`launchpad_analyzer`] infers what the project needs
//! - [`launchpad_provision`] converges a keyless deploy identity
//! - [`launchpad_secrets`] resolves and publishes repository secrets
//! - [`launchpad_pipeline`] generates and renders the deploy workflow
//!
//! [`orchestrator::Orchestrator`] runs them in order against injected
//! collaborators, so the same flow runs against `gcloud`/`gh` or in-memory
//! doubles.

pub mod cli;
pub mod commands;
pub mod errors;
pub mod logging;
pub mod orchestrator;

pub use errors::CliError;
pub use orchestrator::{
    OrchestrationError, OrchestrationFailure, Orchestrator, RunOptions, RunReport, Stage,
};
