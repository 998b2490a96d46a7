//! Property-based tests for pipeline invariants.
//!
//! - Emitted order is a valid topological order of the selected steps
//! - Generated pipelines never reference a secret outside the resolved set
//! - Cycle detection is accurate

use std::collections::{BTreeSet, HashMap};

use launchpad_core::{DeploymentTarget, MigrationTool, ProjectRequirements, ProjectType};
use launchpad_pipeline::{
    GitHubActionsEmitter, PipelineError, PipelineGenerator, PipelineStep, StepGraph,
    workflow::referenced_secrets,
};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn project_type_strategy() -> impl Strategy<Value = ProjectType> {
    prop_oneof![
        Just(ProjectType::Python),
        Just(ProjectType::Node),
        Just(ProjectType::Java),
        Just(ProjectType::Go),
        Just(ProjectType::Rust),
        Just(ProjectType::Ruby),
        Just(ProjectType::Unknown),
    ]
}

fn target_strategy() -> impl Strategy<Value = DeploymentTarget> {
    prop_oneof![
        Just(DeploymentTarget::CloudRun),
        Just(DeploymentTarget::Ecs),
        Just(DeploymentTarget::Aci),
        Just(DeploymentTarget::Unknown),
    ]
}

fn requirements_strategy() -> impl Strategy<Value = ProjectRequirements> {
    (
        project_type_strategy(),
        target_strategy(),
        any::<bool>(),
        any::<bool>(),
        proptest::collection::btree_set("[A-Z][A-Z0-9_]{0,8}", 0..5),
    )
        .prop_map(|(project_type, target, migrations, dockerfile, env_vars)| {
            let mut req = ProjectRequirements::unknown();
            req.project_type = project_type;
            req.deployment_target = target;
            req.has_database_migrations = migrations;
            req.migration_tool = migrations.then_some(MigrationTool::Generic);
            req.has_dockerfile = dockerfile;
            req.detected_env_vars = env_vars;
            req
        })
}

/// DAG whose steps only depend on earlier steps, added in shuffled order.
fn dag_strategy() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (1..=12_usize).prop_flat_map(|count| {
        let deps: Vec<_> = (0..count)
            .map(|i| {
                if i == 0 {
                    Just(vec![]).boxed()
                } else {
                    proptest::collection::vec(0..i, 0..=i.min(3)).boxed()
                }
            })
            .collect();
        deps.prop_flat_map(|deps| {
            let tasks: Vec<(String, Vec<String>)> = deps
                .into_iter()
                .enumerate()
                .map(|(i, d)| {
                    let mut names: Vec<String> = d.into_iter().map(|j| format!("s{j}")).collect();
                    names.sort();
                    names.dedup();
                    (format!("s{i}"), names)
                })
                .collect();
            Just(tasks).prop_shuffle()
        })
    })
}

/// Detected env vars plus every credential a deploy target can ask for.
fn all_resolved(req: &ProjectRequirements) -> BTreeSet<String> {
    let mut resolved = req.detected_env_vars.clone();
    resolved.extend(
        [
            "DEPLOY_SA_EMAIL",
            "GCP_PROJECT_ID",
            "GCP_REGION",
            "WIF_PROVIDER",
            "AWS_ROLE_ARN",
            "AWS_REGION",
            "AZURE_CLIENT_ID",
            "AZURE_TENANT_ID",
            "AZURE_SUBSCRIPTION_ID",
        ]
        .map(String::from),
    );
    resolved
}

fn build(tasks: &[(String, Vec<String>)]) -> StepGraph<PipelineStep> {
    let mut graph = StepGraph::new();
    for (name, deps) in tasks {
        let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
        graph
            .add_step(name, PipelineStep::run(name, name, "true").after(&deps))
            .expect("unique names");
    }
    graph.add_dependency_edges().expect("dependencies exist");
    graph
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// Every step appears after all of its dependencies.
    #[test]
    fn topological_order_respects_dependencies(tasks in dag_strategy()) {
        let graph = build(&tasks);
        let order = graph.topological_names().expect("DAG sorts");
        let positions: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        prop_assert_eq!(order.len(), tasks.len());
        for (name, deps) in &tasks {
            for dep in deps {
                prop_assert!(positions[dep.as_str()] < positions[name.as_str()]);
            }
        }
    }

    /// Sorting the same graph twice gives the same order.
    #[test]
    fn topological_order_is_deterministic(tasks in dag_strategy()) {
        let first = build(&tasks).topological_names().expect("DAG sorts");
        let second = build(&tasks).topological_names().expect("DAG sorts");
        prop_assert_eq!(first, second);
    }

    /// Closing a chain into a ring is always detected.
    #[test]
    fn ring_is_detected(count in 2..=8_usize) {
        let tasks: Vec<(String, Vec<String>)> = (0..count)
            .map(|i| (format!("s{i}"), vec![format!("s{}", (i + count - 1) % count)]))
            .collect();
        let graph = build(&tasks);
        match graph.topological_names() {
            Err(PipelineError::CycleDetected { steps }) => prop_assert_eq!(steps.len(), count),
            other => prop_assert!(false, "expected cycle, got {:?}", other),
        }
    }

    /// With every referenced secret resolved, generation succeeds and the
    /// rendered workflow mentions only resolved secrets.
    #[test]
    fn generated_pipelines_have_no_dangling_secrets(req in requirements_strategy()) {
        let resolved = all_resolved(&req);

        let spec = PipelineGenerator::new().generate(&req, &resolved).expect("generates");
        prop_assert!(spec.secret_refs().is_subset(&resolved));

        let positions: HashMap<&str, usize> = spec
            .names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        for step in &spec.steps {
            for dep in &step.depends_on {
                prop_assert!(positions[dep.as_str()] < positions[step.name.as_str()]);
            }
        }

        let yaml = GitHubActionsEmitter::default().emit(&spec, &resolved).expect("renders");
        prop_assert!(referenced_secrets(&yaml).is_subset(&resolved));
    }

    /// Dropping any referenced secret from the resolved set fails generation
    /// and the error names it.
    #[test]
    fn missing_secret_always_fails(req in requirements_strategy()) {
        let mut resolved = all_resolved(&req);
        let spec = PipelineGenerator::new().generate(&req, &resolved).expect("generates");

        if let Some(dropped) = spec.secret_refs().into_iter().next() {
            resolved.remove(&dropped);
            match PipelineGenerator::new().generate(&req, &resolved) {
                Err(PipelineError::UnresolvedSecrets { missing }) => {
                    prop_assert!(missing.contains(&dropped));
                }
                other => prop_assert!(false, "expected failure, got {:?}", other),
            }
        }
    }
}
