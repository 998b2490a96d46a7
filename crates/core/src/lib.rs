//! Shared models for launchpad.
//!
//! Every stage of the engine exchanges data through the types defined here:
//!
//! - [`ProjectRequirements`]: what static analysis learned about a project tree
//! - [`InfrastructureResource`]: a cloud identity resource and its lifecycle state
//! - [`DeployConfig`]: the explicit configuration threaded into every external call
//!
//! Models are produced by exactly one component and handed downstream by value
//! or shared reference.

pub mod config;
mod error;
pub mod requirements;
pub mod resource;

pub use config::{
    AnalysisConfig, CommandConfig, DEFAULT_CONFIG_FILE, DeployConfig, IdentityConfig,
    PipelineConfig, RepositoryRef, RetryConfig, SecretsConfig, SuppliedSecret,
};
pub use error::{Error, Result};
pub use requirements::{DeploymentTarget, MigrationTool, ProjectRequirements, ProjectType};
pub use resource::{InfrastructureResource, ResourceKind, ResourceState};
