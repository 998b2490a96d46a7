//! Merge analyzer and provisioner output into a [`SecretSet`].

use std::collections::BTreeMap;

use launchpad_core::{DeployConfig, InfrastructureResource, ProjectRequirements, ResourceKind};

use crate::types::{SecretDescriptor, SecretOrigin, SecretSet, SecretValue};

/// Project id the workflow deploys into.
pub const GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";
/// Region the workflow deploys into.
pub const GCP_REGION: &str = "GCP_REGION";
/// Email of the deploy identity.
pub const DEPLOY_SA_EMAIL: &str = "DEPLOY_SA_EMAIL";
/// Full resource name of the workload identity provider.
pub const WIF_PROVIDER: &str = "WIF_PROVIDER";

/// Names derived from infrastructure, in the order they are emitted.
pub const INFRASTRUCTURE_SECRETS: [&str; 4] =
    [GCP_PROJECT_ID, GCP_REGION, DEPLOY_SA_EMAIL, WIF_PROVIDER];

/// Values known outside of analysis and provisioning.
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    /// Project id
    pub project_id: String,
    /// Deployment region
    pub region: String,
    /// Operator-supplied values by secret name
    pub supplied: BTreeMap<String, SecretValue>,
}

impl ResolverContext {
    /// Context with no supplied values.
    #[must_use]
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            supplied: BTreeMap::new(),
        }
    }

    /// Add a supplied value.
    #[must_use]
    pub fn with_supplied(mut self, name: impl Into<String>, value: SecretValue) -> Self {
        self.supplied.insert(name.into(), value);
        self
    }

    /// Build a context from configuration, reading each
    /// `[secrets.supplied]` entry from its environment variable.
    ///
    /// Unset or empty variables are skipped with a warning; the secret then
    /// stays unresolved.
    #[must_use]
    pub fn from_config(config: &DeployConfig) -> Self {
        let mut context = Self::new(&config.project_id, &config.region);
        for (name, source) in &config.secrets.supplied {
            match std::env::var(&source.env) {
                Ok(value) if !value.is_empty() => {
                    context.supplied.insert(name.clone(), SecretValue::new(value));
                }
                _ => {
                    tracing::warn!(
                        secret = %name,
                        env = %source.env,
                        "Supplied secret variable is not set"
                    );
                }
            }
        }
        context
    }
}

/// Builds the [`SecretSet`] for a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretsResolver;

impl SecretsResolver {
    /// Create a resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Merge detected env vars, supplied values and infrastructure outputs.
    ///
    /// - every detected env var becomes a required runtime-detected
    ///   descriptor, resolved only if a value was supplied for it
    /// - supplied names that were not detected become user-supplied
    /// - the four infrastructure names are always present and win any
    ///   name collision
    ///
    /// Values are never invented: a name without a source stays unresolved.
    #[must_use]
    pub fn resolve(
        &self,
        requirements: &ProjectRequirements,
        resources: &[InfrastructureResource],
        context: &ResolverContext,
    ) -> SecretSet {
        let mut set = SecretSet::new();

        for name in &requirements.detected_env_vars {
            let descriptor = match context.supplied.get(name) {
                Some(value) => {
                    SecretDescriptor::resolved(name, SecretOrigin::RuntimeDetected, value.clone())
                }
                None => SecretDescriptor::unresolved(name, SecretOrigin::RuntimeDetected),
            };
            set.insert(descriptor);
        }

        for (name, value) in &context.supplied {
            if !set.contains(name) {
                set.insert(SecretDescriptor::resolved(
                    name,
                    SecretOrigin::UserSupplied,
                    value.clone(),
                ));
            }
        }

        let remote_id = |kind: ResourceKind| {
            resources
                .iter()
                .find(|r| r.kind == kind && r.is_present())
                .and_then(|r| r.remote_id.clone())
        };
        let derived = [
            (GCP_PROJECT_ID, non_empty(&context.project_id)),
            (GCP_REGION, non_empty(&context.region)),
            (DEPLOY_SA_EMAIL, remote_id(ResourceKind::ServiceAccount)),
            (WIF_PROVIDER, remote_id(ResourceKind::IdentityProvider)),
        ];
        for (name, value) in derived {
            let descriptor = match value {
                Some(value) => SecretDescriptor::resolved(
                    name,
                    SecretOrigin::InfrastructureDerived,
                    SecretValue::new(value),
                ),
                None => SecretDescriptor::unresolved(name, SecretOrigin::InfrastructureDerived),
            };
            if let Some(replaced) = set.insert(descriptor) {
                tracing::debug!(
                    secret = name,
                    replaced_origin = %replaced.origin,
                    "Infrastructure-derived secret takes precedence"
                );
            }
        }

        tracing::info!(
            secrets = set.len(),
            resolved = set.resolved_names().len(),
            unresolved = set.unresolved().len(),
            "Secrets resolved"
        );
        set
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
