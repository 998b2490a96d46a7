//! Step selection, ordering and secret validation.

use std::collections::{BTreeSet, HashSet};

use launchpad_core::ProjectRequirements;

use crate::catalog;
use crate::error::{PipelineError, Result};
use crate::graph::StepGraph;
use crate::step::{PipelineSpec, PipelineStep};

/// Builds a [`PipelineSpec`] from project requirements.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineGenerator;

impl PipelineGenerator {
    /// Create a generator over the built-in catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Select, order and validate catalog steps for `requirements`.
    ///
    /// # Errors
    ///
    /// Fails without producing a spec if the selected steps form a cycle,
    /// depend on unknown steps, or reference a secret outside
    /// `resolved_secret_names`.
    pub fn generate(
        &self,
        requirements: &ProjectRequirements,
        resolved_secret_names: &BTreeSet<String>,
    ) -> Result<PipelineSpec> {
        self.generate_from(
            catalog::candidates(requirements),
            requirements,
            resolved_secret_names,
        )
    }

    /// Same as [`Self::generate`] over an explicit candidate list.
    ///
    /// Candidate order is the tie-break order. A dependency on a candidate
    /// whose condition excluded it is dropped; a dependency on a name that is
    /// not a candidate at all is an error.
    ///
    /// # Errors
    ///
    /// See [`Self::generate`].
    pub fn generate_from(
        &self,
        candidates: Vec<PipelineStep>,
        requirements: &ProjectRequirements,
        resolved_secret_names: &BTreeSet<String>,
    ) -> Result<PipelineSpec> {
        let _span = tracing::info_span!(
            "generate_pipeline",
            project_type = %requirements.project_type,
            target = %requirements.deployment_target,
        )
        .entered();

        let (selected, excluded): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|s| s.condition.evaluate(requirements));
        let excluded: HashSet<String> = excluded.into_iter().map(|s| s.name).collect();
        tracing::debug!(selected = selected.len(), excluded = excluded.len(), "Steps selected");

        let mut graph = StepGraph::new();
        for mut step in selected {
            step.depends_on.retain(|dep| !excluded.contains(dep));
            let name = step.name.clone();
            graph.add_step(&name, step)?;
        }
        graph.add_dependency_edges()?;
        let steps = graph.into_sorted()?;

        let missing: BTreeSet<String> = steps
            .iter()
            .flat_map(|s| s.secret_refs.iter())
            .filter(|name| !resolved_secret_names.contains(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Pipeline references unresolved secrets");
            return Err(PipelineError::UnresolvedSecrets { missing });
        }

        let spec = PipelineSpec { steps };
        tracing::info!(steps = ?spec.names(), "Pipeline generated");
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::*;
    use crate::condition::Condition;
    use launchpad_core::{DeploymentTarget, MigrationTool, ProjectType};
    use std::path::PathBuf;

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn infrastructure() -> BTreeSet<String> {
        names(&["DEPLOY_SA_EMAIL", "GCP_PROJECT_ID", "GCP_REGION", "WIF_PROVIDER"])
    }

    fn python_service() -> ProjectRequirements {
        let mut req = ProjectRequirements::unknown();
        req.project_type = ProjectType::Python;
        req.framework = Some("fastapi".to_string());
        req.dependency_manifest_paths = vec![PathBuf::from("requirements.txt")];
        req.detected_env_vars = names(&["DATABASE_URL"]);
        req.has_database_migrations = true;
        req.migration_tool = Some(MigrationTool::Alembic);
        req.has_dockerfile = true;
        req.deployment_target = DeploymentTarget::CloudRun;
        req
    }

    #[test]
    fn test_python_service_with_migrations() {
        let mut resolved = infrastructure();
        resolved.insert("DATABASE_URL".to_string());

        let spec = PipelineGenerator::new()
            .generate(&python_service(), &resolved)
            .unwrap();

        assert_eq!(
            spec.names(),
            vec![
                CHECKOUT,
                SETUP_TOOLCHAIN,
                INSTALL_DEPENDENCIES,
                RUN_TESTS,
                AUTHENTICATE_GCP,
                BUILD_IMAGE,
                RUN_MIGRATIONS,
                DEPLOY_CLOUD_RUN,
            ]
        );
        assert!(spec.secret_refs().is_subset(&resolved));
    }

    #[test]
    fn test_missing_secret_fails_and_names_it() {
        let mut req = python_service();
        req.detected_env_vars = names(&["API_KEY", "DATABASE_URL"]);
        let mut resolved = infrastructure();
        resolved.insert("DATABASE_URL".to_string());

        let err = PipelineGenerator::new().generate(&req, &resolved).unwrap_err();
        match err {
            PipelineError::UnresolvedSecrets { missing } => {
                assert_eq!(missing, names(&["API_KEY"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_project_still_checks_out() {
        let spec = PipelineGenerator::new()
            .generate(&ProjectRequirements::unknown(), &BTreeSet::new())
            .unwrap();
        assert_eq!(spec.names(), vec![CHECKOUT]);
    }

    #[test]
    fn test_excluded_dependencies_are_dropped() {
        let mut req = ProjectRequirements::unknown();
        req.has_dockerfile = true;
        req.deployment_target = DeploymentTarget::CloudRun;

        let spec = PipelineGenerator::new()
            .generate(&req, &infrastructure())
            .unwrap();

        assert_eq!(
            spec.names(),
            vec![CHECKOUT, AUTHENTICATE_GCP, BUILD_IMAGE, DEPLOY_CLOUD_RUN]
        );
        let deploy = spec.step(DEPLOY_CLOUD_RUN).unwrap();
        assert_eq!(deploy.depends_on, names(&[AUTHENTICATE_GCP, BUILD_IMAGE]));
    }

    #[test]
    fn test_ecs_target_needs_aws_credentials() {
        let mut req = ProjectRequirements::unknown();
        req.project_type = ProjectType::Node;
        req.deployment_target = DeploymentTarget::Ecs;
        req.detected_env_vars = names(&["STRIPE_KEY"]);

        let err = PipelineGenerator::new()
            .generate(&req, &names(&["STRIPE_KEY"]))
            .unwrap_err();
        match err {
            PipelineError::UnresolvedSecrets { missing } => {
                assert_eq!(missing, names(&["AWS_REGION", "AWS_ROLE_ARN"]));
            }
            other => panic!("unexpected error: {other}"),
        }

        let available = names(&["AWS_REGION", "AWS_ROLE_ARN", "STRIPE_KEY"]);
        let spec = PipelineGenerator::new().generate(&req, &available).unwrap();
        assert_eq!(spec.names().last(), Some(&DEPLOY_ECS));
        assert!(spec.step(AUTHENTICATE_GCP).is_none());
        let deploy = spec.step(DEPLOY_ECS).unwrap();
        assert!(deploy.depends_on.contains(AUTHENTICATE_AWS));
        assert_eq!(
            deploy.with_inputs.get("cluster").map(String::as_str),
            Some("${{ vars.ECS_CLUSTER }}")
        );
        assert!(spec.secret_refs().is_subset(&available));
    }

    #[test]
    fn test_aci_target_logs_in_to_azure_first() {
        let mut req = ProjectRequirements::unknown();
        req.deployment_target = DeploymentTarget::Aci;
        let available = names(&["AZURE_CLIENT_ID", "AZURE_SUBSCRIPTION_ID", "AZURE_TENANT_ID"]);

        let spec = PipelineGenerator::new().generate(&req, &available).unwrap();

        assert_eq!(spec.names(), vec![CHECKOUT, AUTHENTICATE_AZURE, DEPLOY_ACI]);
        assert_eq!(
            spec.step(DEPLOY_ACI).unwrap().depends_on,
            names(&[AUTHENTICATE_AZURE])
        );
    }

    #[test]
    fn test_unknown_dependency_is_error() {
        let candidates = vec![
            PipelineStep::run("build", "Build", "make"),
            PipelineStep::run("deploy", "Deploy", "make deploy").after(&["build", "publish"]),
        ];
        let err = PipelineGenerator::new()
            .generate_from(candidates, &ProjectRequirements::unknown(), &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingDependencies { .. }));
    }

    #[test]
    fn test_cycle_is_error() {
        let candidates = vec![
            PipelineStep::run("a", "A", "true").after(&["b"]),
            PipelineStep::run("b", "B", "true").after(&["a"]),
            PipelineStep::run("skipped", "Skipped", "true")
                .when(Condition::HasMigrations)
                .after(&["a"]),
        ];
        let err = PipelineGenerator::new()
            .generate_from(candidates, &ProjectRequirements::unknown(), &BTreeSet::new())
            .unwrap_err();
        match err {
            PipelineError::CycleDetected { steps } => assert_eq!(steps, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let resolved = {
            let mut r = infrastructure();
            r.insert("DATABASE_URL".to_string());
            r
        };
        let first = PipelineGenerator::new()
            .generate(&python_service(), &resolved)
            .unwrap();
        let second = PipelineGenerator::new()
            .generate(&python_service(), &resolved)
            .unwrap();
        assert_eq!(first, second);
    }
}
