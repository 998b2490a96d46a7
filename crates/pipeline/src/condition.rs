//! Predicates deciding whether a catalog step applies to a project.

use launchpad_core::{DeploymentTarget, ProjectRequirements};
use serde::Serialize;

/// Guard evaluated against [`ProjectRequirements`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    /// Always selected
    Always,
    /// An ecosystem was recognised
    ProjectKnown,
    /// A Dockerfile exists at the root
    HasDockerfile,
    /// Database migrations were detected
    HasMigrations,
    /// The deployment target matches
    TargetIs(DeploymentTarget),
    /// Every inner condition holds
    All(Vec<Condition>),
}

impl Condition {
    /// Evaluate against `requirements`.
    #[must_use]
    pub fn evaluate(&self, requirements: &ProjectRequirements) -> bool {
        match self {
            Self::Always => true,
            Self::ProjectKnown => requirements.is_known(),
            Self::HasDockerfile => requirements.has_dockerfile,
            Self::HasMigrations => requirements.has_database_migrations,
            Self::TargetIs(target) => requirements.deployment_target == *target,
            Self::All(conditions) => conditions.iter().all(|c| c.evaluate(requirements)),
        }
    }
}
