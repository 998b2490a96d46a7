//! Deploy pipeline generation for launchpad.
//!
//! [`PipelineGenerator`] selects steps from a fixed [`catalog`] by evaluating
//! each step's [`Condition`] against the project requirements, orders them
//! with a petgraph-backed [`StepGraph`], and refuses to produce a pipeline
//! that references a secret outside the resolved set.
//! [`GitHubActionsEmitter`] renders the result as workflow YAML and checks
//! the rendered text once more.
//!
//! # Example
//!
//! ```ignore
//! use launchpad_pipeline::{GitHubActionsEmitter, PipelineGenerator};
//!
//! let spec = PipelineGenerator::new().generate(&requirements, &resolved)?;
//! let yaml = GitHubActionsEmitter::default().emit(&spec, &resolved)?;
//! ```

pub mod catalog;
mod condition;
mod error;
mod generator;
pub mod graph;
mod step;
pub mod workflow;

pub use condition::Condition;
pub use error::{PipelineError, Result};
pub use generator::PipelineGenerator;
pub use graph::{GraphNode, StepGraph, StepNodeData};
pub use step::{PipelineSpec, PipelineStep, StepAction, secret_expression};
pub use workflow::GitHubActionsEmitter;
