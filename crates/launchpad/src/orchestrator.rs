//! Stage-by-stage execution of a launchpad run.
//!
//! ```text
//! analyze -> provision -> resolve -> publish -> generate -> render
//! ```
//!
//! Each stage is awaited before the next one starts. A fatal error stops the
//! run and comes back as an [`OrchestrationFailure`] carrying the
//! [`RunReport`] of everything that converged before it. Re-running after a
//! failure is safe because every stage is idempotent.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use launchpad_analyzer::ProjectAnalyzer;
use launchpad_core::{DeployConfig, InfrastructureResource, ProjectRequirements};
use launchpad_pipeline::{GitHubActionsEmitter, PipelineError, PipelineGenerator, PipelineSpec};
use launchpad_provision::{
    CloudIdentityProvisioner, GcloudCli, InfrastructureProvisioner, ProvisionError, Sleeper,
    TokioSleeper,
};
use launchpad_secrets::{
    GhCliStore, PublishError, PublishOptions, PublishReport, ResolverContext, SecretSet,
    SecretStoreClient, SecretsPublisher, SecretsResolver, StoreError,
};
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// A step of the run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Static project analysis
    Analyze,
    /// Identity and trust binding convergence
    Provision,
    /// Secret set construction
    Resolve,
    /// Secret store writes
    Publish,
    /// Pipeline step selection and ordering
    Generate,
    /// Workflow rendering
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Analyze => "analyze",
            Self::Provision => "provision",
            Self::Resolve => "resolve",
            Self::Publish => "publish",
            Self::Generate => "generate",
            Self::Render => "render",
        })
    }
}

/// What a run produced, stage by stage.
///
/// Fields of stages that did not run are empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Analysis result
    pub requirements: Option<ProjectRequirements>,
    /// Identity resources in provisioning order
    pub resources: Vec<InfrastructureResource>,
    /// Secrets manifest YAML (names, origins, required flags; no values)
    pub secrets_manifest: Option<String>,
    /// Every secret name in the resolved set
    pub secret_names: BTreeSet<String>,
    /// Names that carry a value
    pub resolved_secrets: BTreeSet<String>,
    /// Required secrets without a value
    pub unresolved_secrets: BTreeSet<String>,
    /// Publishing outcome
    pub publish: Option<PublishReport>,
    /// Secret names the generated pipeline may reference
    pub available_secrets: BTreeSet<String>,
    /// Ordered pipeline steps
    pub pipeline: Option<PipelineSpec>,
    /// Rendered workflow YAML
    pub workflow: Option<String>,
}

impl RunReport {
    /// Human-readable summary, one line per fact.
    #[must_use]
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(req) = &self.requirements {
            lines.push(format!(
                "project: {} ({}), target {}, {} env var(s), migrations: {}",
                req.project_type,
                req.framework.as_deref().unwrap_or("no framework"),
                req.deployment_target,
                req.detected_env_vars.len(),
                if req.has_database_migrations { "yes" } else { "no" },
            ));
        }
        for resource in &self.resources {
            lines.push(format!(
                "resource: {} {} {}",
                resource.kind,
                resource.logical_name,
                resource.state()
            ));
        }
        if !self.secret_names.is_empty() {
            lines.push(format!("secrets: {}", self.secret_names.len()));
        }
        if !self.unresolved_secrets.is_empty() {
            lines.push(format!(
                "unresolved: {}",
                self.unresolved_secrets
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if let Some(publish) = &self.publish {
            lines.push(format!(
                "published: {} written, {} already stored, {} failed",
                publish.written.len(),
                publish.skipped_existing.len(),
                publish.failed.len()
            ));
            for (name, message) in &publish.failed {
                lines.push(format!("  {name}: {message}"));
            }
        }
        if let Some(pipeline) = &self.pipeline {
            lines.push(format!("pipeline: {}", pipeline.names().join(" -> ")));
        }
        lines
    }
}

/// A fatal stage error.
#[derive(Error, Debug, Diagnostic)]
pub enum OrchestrationError {
    /// Provisioning stopped
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provision(#[from] ProvisionError),

    /// Publishing could not start
    #[error(transparent)]
    #[diagnostic(transparent)]
    Publish(#[from] PublishError),

    /// The secret store could not be read
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// The pipeline could not be generated or rendered
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),

    /// The secrets manifest could not be serialized
    #[error("Failed to render secrets manifest: {message}")]
    #[diagnostic(code(launchpad::run::manifest))]
    Manifest {
        /// Serializer message
        message: String,
    },
}

/// A run that stopped at `stage`.
#[derive(Error, Debug, Diagnostic)]
#[error("{stage} stage failed")]
#[diagnostic(
    code(launchpad::run::failed),
    help("Re-running is safe: resources and secrets that already exist are reused")
)]
pub struct OrchestrationFailure {
    /// Stage that failed
    pub stage: Stage,
    /// Why it failed
    #[source]
    #[diagnostic_source]
    pub error: OrchestrationError,
    /// Everything produced before the failure
    pub converged: Box<RunReport>,
}

/// Options for a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Replace secrets that already exist in the store
    pub force_overwrite: bool,
}

/// Runs the stages against injected collaborators.
pub struct Orchestrator {
    config: DeployConfig,
    cloud: Arc<dyn CloudIdentityProvisioner>,
    store: Arc<dyn SecretStoreClient>,
    sleeper: Arc<dyn Sleeper>,
    context: ResolverContext,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("project_id", &self.config.project_id)
            .field("store", &self.store.target())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator over explicit collaborators.
    ///
    /// Supplied secret values are read from the environment as described
    /// by `config.secrets`.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        cloud: Arc<dyn CloudIdentityProvisioner>,
        store: Arc<dyn SecretStoreClient>,
    ) -> Self {
        let context = ResolverContext::from_config(&config);
        Self {
            config,
            cloud,
            store,
            sleeper: Arc::new(TokioSleeper),
            context,
        }
    }

    /// Orchestrator shelling out to `gcloud` and `gh`.
    #[must_use]
    pub fn from_config(config: DeployConfig) -> Self {
        let timeout = config.commands.timeout();
        let cloud = Arc::new(GcloudCli::new(config.commands.gcloud.clone(), timeout));
        let store = Arc::new(GhCliStore::new(
            config.commands.gh.clone(),
            config.repository.clone(),
            timeout,
        ));
        Self::new(config, cloud, store)
    }

    /// Replace the sleeper used between provisioning retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the resolver context, including supplied secret values.
    #[must_use]
    pub fn with_context(mut self, context: ResolverContext) -> Self {
        self.context = context;
        self
    }

    /// Configuration of this orchestrator.
    #[must_use]
    pub const fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Analyze the project at `root`.
    #[must_use]
    pub fn analyze(&self, root: &Path) -> ProjectRequirements {
        ProjectAnalyzer::new(self.config.analysis.clone()).analyze(root)
    }

    /// Analyze, then converge the deploy identity.
    ///
    /// # Errors
    ///
    /// Returns a failure at [`Stage::Provision`].
    pub async fn provision(&self, root: &Path) -> Result<RunReport, OrchestrationFailure> {
        self.execute(root, RunOptions::default(), Stage::Provision).await
    }

    /// Analyze and resolve without touching the cloud or the store.
    ///
    /// Infrastructure secrets stay unresolved since no resource is known.
    ///
    /// # Errors
    ///
    /// Returns a failure at [`Stage::Resolve`] if the manifest cannot be
    /// serialized.
    pub fn manifest(&self, root: &Path) -> Result<RunReport, OrchestrationFailure> {
        let mut report = RunReport::default();
        let requirements = self.analyze(root);
        let set = self.resolve(&requirements, &[]);
        report.requirements = Some(requirements);
        record_secrets(&mut report, &set)
            .map_err(|error| failure(Stage::Resolve, error, &report))?;
        Ok(report)
    }

    /// Analyze, provision, resolve and publish.
    ///
    /// # Errors
    ///
    /// Returns a failure at the first fatal stage.
    pub async fn publish(
        &self,
        root: &Path,
        options: RunOptions,
    ) -> Result<RunReport, OrchestrationFailure> {
        self.execute(root, options, Stage::Publish).await
    }

    /// Generate the workflow from what the store already holds.
    ///
    /// Nothing is provisioned or written; the pipeline may reference a
    /// secret only if the store already holds it.
    ///
    /// # Errors
    ///
    /// Returns a failure at [`Stage::Publish`] if the store cannot be
    /// listed, or at [`Stage::Generate`] / [`Stage::Render`].
    #[tracing::instrument(name = "generate", skip_all, fields(root = %root.display()))]
    pub async fn generate(&self, root: &Path) -> Result<RunReport, OrchestrationFailure> {
        let mut report = self.manifest(root)?;
        let stored = match self.store.list().await {
            Ok(stored) => stored,
            Err(error) => return Err(failure(Stage::Publish, error, &report)),
        };
        report.available_secrets = stored;
        self.render(report)
    }

    /// Run every stage.
    ///
    /// # Errors
    ///
    /// Returns a failure at the first fatal stage.
    pub async fn run(
        &self,
        root: &Path,
        options: RunOptions,
    ) -> Result<RunReport, OrchestrationFailure> {
        self.execute(root, options, Stage::Render).await
    }

    #[tracing::instrument(
        name = "orchestrate",
        skip_all,
        fields(root = %root.display(), until = %last, project = %self.config.project_id)
    )]
    async fn execute(
        &self,
        root: &Path,
        options: RunOptions,
        last: Stage,
    ) -> Result<RunReport, OrchestrationFailure> {
        let mut report = RunReport::default();

        let requirements = self.analyze(root);
        report.requirements = Some(requirements.clone());

        let provisioner =
            InfrastructureProvisioner::new(self.cloud.clone()).with_sleeper(self.sleeper.clone());
        match provisioner.ensure(&requirements, &self.config).await {
            Ok(resources) => report.resources = resources,
            Err(failed) => {
                report.resources = failed.resources;
                return Err(failure(Stage::Provision, failed.error, &report));
            }
        }
        if last == Stage::Provision {
            return Ok(report);
        }

        let set = self.resolve(&requirements, &report.resources);
        record_secrets(&mut report, &set)
            .map_err(|error| failure(Stage::Resolve, error, &report))?;

        let published = SecretsPublisher::new()
            .publish(
                &set,
                self.store.as_ref(),
                PublishOptions {
                    force_overwrite: options.force_overwrite,
                },
            )
            .await
            .map_err(|error| failure(Stage::Publish, error, &report))?;
        if !published.is_complete() {
            tracing::warn!(
                failed = published.failed.len(),
                "Some secrets were not written; steps using them will be rejected"
            );
        }
        report.available_secrets = published.available();
        report.publish = Some(published);
        if last == Stage::Publish {
            return Ok(report);
        }

        self.render(report)
    }

    fn resolve(
        &self,
        requirements: &ProjectRequirements,
        resources: &[InfrastructureResource],
    ) -> SecretSet {
        let _span = tracing::info_span!("resolve").entered();
        let set = SecretsResolver::new().resolve(requirements, resources, &self.context);
        tracing::info!(
            secrets = set.len(),
            unresolved = set.unresolved().len(),
            "Secrets resolved"
        );
        set
    }

    fn render(&self, mut report: RunReport) -> Result<RunReport, OrchestrationFailure> {
        let requirements = report
            .requirements
            .clone()
            .unwrap_or_else(ProjectRequirements::unknown);
        let spec = PipelineGenerator::new()
            .generate(&requirements, &report.available_secrets)
            .map_err(|error| failure(Stage::Generate, error, &report))?;
        let workflow = GitHubActionsEmitter::from_config(&self.config.pipeline)
            .emit(&spec, &report.available_secrets)
            .map_err(|error| failure(Stage::Render, error, &report))?;

        report.pipeline = Some(spec);
        report.workflow = Some(workflow);
        tracing::info!("Pipeline generated");
        Ok(report)
    }
}

fn record_secrets(report: &mut RunReport, set: &SecretSet) -> Result<(), OrchestrationError> {
    report.secret_names = set.names();
    report.resolved_secrets = set.resolved_names();
    report.unresolved_secrets = set.unresolved().into_iter().map(|d| d.name.clone()).collect();
    let manifest = set.manifest_yaml().map_err(|e| OrchestrationError::Manifest {
        message: e.to_string(),
    })?;
    report.secrets_manifest = Some(manifest);
    Ok(())
}

fn failure(
    stage: Stage,
    error: impl Into<OrchestrationError>,
    converged: &RunReport,
) -> OrchestrationFailure {
    let error = error.into();
    tracing::error!(stage = %stage, error = %error, "Run stopped");
    OrchestrationFailure {
        stage,
        error,
        converged: Box::new(converged.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Analyze < Stage::Provision);
        assert!(Stage::Publish < Stage::Generate);
        assert_eq!(Stage::Render.to_string(), "render");
    }

    #[test]
    fn test_empty_report_has_no_summary() {
        assert!(RunReport::default().summary().is_empty());
    }

    #[test]
    fn test_summary_lists_unresolved_names() {
        let report = RunReport {
            secret_names: ["API_KEY", "WIF_PROVIDER"].map(String::from).into(),
            unresolved_secrets: ["API_KEY"].map(String::from).into(),
            ..RunReport::default()
        };
        let summary = report.summary();
        assert!(summary.contains(&"unresolved: API_KEY".to_string()));
    }
}
