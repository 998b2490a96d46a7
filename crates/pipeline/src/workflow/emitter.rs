//! GitHub Actions workflow emitter.
//!
//! Renders a [`PipelineSpec`] as a single-job workflow.
//!
//! | Spec | GitHub Actions |
//! |------|----------------|
//! | step order | `jobs.deploy.steps` order |
//! | `step.name` | step `id` |
//! | `StepAction::Uses` | step `uses:` + `with:` |
//! | `StepAction::Run` | step `run:` |
//! | `secret_refs` | `${{ secrets.NAME }}` in `with:` / `env:` |

use std::collections::BTreeSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use launchpad_core::PipelineConfig;
use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::step::{PipelineSpec, StepAction};
use crate::workflow::schema::{
    Concurrency, Job, PermissionLevel, Permissions, PushTrigger, Step, Workflow,
    WorkflowDispatchTrigger, WorkflowTriggers,
};

/// Header prepended to every emitted workflow.
pub const HEADER: &str =
    "# Generated by launchpad - do not edit manually\n# Regenerate with: launchpad generate\n\n";

const JOB_ID: &str = "deploy";

static SECRET_EXPRESSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*secrets\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok());

/// Secret names referenced by `${{ secrets.* }}` expressions in `text`.
#[must_use]
pub fn referenced_secrets(text: &str) -> BTreeSet<String> {
    SECRET_EXPRESSION
        .as_ref()
        .map(|re| {
            re.captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Renders deploy workflows.
#[derive(Debug, Clone)]
pub struct GitHubActionsEmitter {
    /// Workflow display name
    pub workflow_name: String,
    /// Branch whose pushes trigger a deploy
    pub branch: String,
    /// Runner label
    pub runner: String,
    /// Service name exported as `SERVICE_NAME`
    pub service_name: String,
}

impl Default for GitHubActionsEmitter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl GitHubActionsEmitter {
    /// Create an emitter from `[pipeline]` configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            workflow_name: config.workflow_name.clone(),
            branch: config.branch.clone(),
            runner: config.runner.clone(),
            service_name: config.service_name.clone(),
        }
    }

    /// Build the workflow structure for `spec`.
    #[must_use]
    pub fn workflow(&self, spec: &PipelineSpec) -> Workflow {
        let steps = spec
            .steps
            .iter()
            .map(|step| {
                let mut rendered = match &step.action {
                    StepAction::Uses(action) => Step::uses(action),
                    StepAction::Run(script) => Step::run(script),
                }
                .with_name(&step.title)
                .with_id(&step.name);
                rendered.with_inputs.clone_from(&step.with_inputs);
                rendered.env.clone_from(&step.env);
                rendered
            })
            .collect();

        let mut jobs = IndexMap::new();
        jobs.insert(
            JOB_ID.to_string(),
            Job {
                name: Some(self.workflow_name.clone()),
                runs_on: self.runner.clone(),
                timeout_minutes: Some(30),
                steps,
            },
        );

        let mut env = IndexMap::new();
        env.insert("SERVICE_NAME".to_string(), self.service_name.clone());

        Workflow {
            name: self.workflow_name.clone(),
            on: WorkflowTriggers {
                push: Some(PushTrigger {
                    branches: vec![self.branch.clone()],
                }),
                workflow_dispatch: Some(WorkflowDispatchTrigger {}),
            },
            concurrency: Some(Concurrency {
                group: "deploy-${{ github.ref }}".to_string(),
                cancel_in_progress: Some(false),
            }),
            permissions: Some(Permissions {
                contents: Some(PermissionLevel::Read),
                id_token: Some(PermissionLevel::Write),
            }),
            env,
            jobs,
        }
    }

    /// Render `spec` to workflow YAML.
    ///
    /// After rendering, every `${{ secrets.* }}` expression in the output is
    /// checked against `resolved_secret_names`; nothing is returned if any
    /// falls outside it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UndeclaredSecretExpressions`] for stray
    /// secret expressions and [`PipelineError::Render`] if YAML serialization
    /// fails.
    pub fn emit(
        &self,
        spec: &PipelineSpec,
        resolved_secret_names: &BTreeSet<String>,
    ) -> Result<String> {
        let yaml = serde_yaml::to_string(&self.workflow(spec)).map_err(|e| {
            PipelineError::Render {
                message: e.to_string(),
            }
        })?;
        let rendered = format!("{HEADER}{yaml}");

        let names: BTreeSet<String> = referenced_secrets(&rendered)
            .into_iter()
            .filter(|name| !resolved_secret_names.contains(name))
            .collect();
        if !names.is_empty() {
            return Err(PipelineError::UndeclaredSecretExpressions { names });
        }

        tracing::debug!(bytes = rendered.len(), steps = spec.steps.len(), "Workflow rendered");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::PipelineStep;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn spec() -> PipelineSpec {
        PipelineSpec {
            steps: vec![
                PipelineStep::uses("checkout", "Checkout", "actions/checkout@v4"),
                PipelineStep::uses("authenticate-gcp", "Authenticate", "google-github-actions/auth@v2")
                    .after(&["checkout"])
                    .with_secret_input("workload_identity_provider", "WIF_PROVIDER"),
                PipelineStep::run("run-migrations", "Migrate", "alembic upgrade head")
                    .after(&["authenticate-gcp"])
                    .with_secret_env(["DATABASE_URL"]),
            ],
        }
    }

    #[test]
    fn test_referenced_secrets() {
        let found = referenced_secrets(
            "a: ${{ secrets.API_KEY }}\nb: ${{secrets.DB_URL}}\nc: ${{ env.IMAGE }}\n",
        );
        assert_eq!(found, names(&["API_KEY", "DB_URL"]));
    }

    #[test]
    fn test_emit_single_job_in_order() {
        let yaml = GitHubActionsEmitter::default()
            .emit(&spec(), &names(&["DATABASE_URL", "WIF_PROVIDER"]))
            .unwrap();

        assert!(yaml.starts_with(HEADER));
        assert!(yaml.contains("contents: read"));
        assert!(yaml.contains("id-token: write"));
        assert!(yaml.contains("SERVICE_NAME: app"));
        assert!(yaml.contains("workload_identity_provider:"));
        assert_eq!(
            referenced_secrets(&yaml),
            names(&["DATABASE_URL", "WIF_PROVIDER"])
        );

        let checkout = yaml.find("id: checkout").unwrap();
        let auth = yaml.find("id: authenticate-gcp").unwrap();
        let migrate = yaml.find("id: run-migrations").unwrap();
        assert!(checkout < auth && auth < migrate);
    }

    #[test]
    fn test_emit_rejects_undeclared_secret_expression() {
        let err = GitHubActionsEmitter::default()
            .emit(&spec(), &names(&["WIF_PROVIDER"]))
            .unwrap_err();
        match err {
            PipelineError::UndeclaredSecretExpressions { names: found } => {
                assert_eq!(found, names(&["DATABASE_URL"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_emit_is_byte_identical() {
        let emitter = GitHubActionsEmitter::default();
        let resolved = names(&["DATABASE_URL", "WIF_PROVIDER"]);
        assert_eq!(
            emitter.emit(&spec(), &resolved).unwrap(),
            emitter.emit(&spec(), &resolved).unwrap()
        );
    }
}
