//! Full runs against the in-memory cloud and secret store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use launchpad::cli::Commands;
use launchpad::commands::execute_with;
use launchpad::{OrchestrationError, Orchestrator, RunOptions, Stage};
use launchpad_core::{DeployConfig, RepositoryRef, ResourceKind, ResourceState};
use launchpad_pipeline::PipelineError;
use launchpad_provision::testing::{InMemoryCloud, RecordingSleeper};
use launchpad_secrets::testing::InMemorySecretStore;
use launchpad_secrets::{ResolverContext, SecretValue};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn python_service() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "requirements.txt", "fastapi==0.110\nuvicorn\nalembic\n");
    write(
        root,
        "app/main.py",
        "import os\nDB = os.environ['DATABASE_URL']\nKEY = os.getenv('API_KEY')\n",
    );
    write(root, "migrations/env.py", "");
    write(root, "Dockerfile", "FROM python:3.12-slim\n");
    write(
        root,
        "service.yaml",
        "apiVersion: serving.knative.dev/v1\nkind: Service\n",
    );
    dir
}

fn config() -> DeployConfig {
    let mut config = DeployConfig::new("demo-project", RepositoryRef::parse("acme/shop").unwrap());
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 40;
    config
}

struct Harness {
    cloud: Arc<InMemoryCloud>,
    store: Arc<InMemorySecretStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            cloud: Arc::new(InMemoryCloud::new()),
            store: Arc::new(InMemorySecretStore::new()),
        }
    }

    fn orchestrator(&self, supplied: &[(&str, &str)]) -> Orchestrator {
        let mut context = ResolverContext::new("demo-project", "us-central1");
        for (name, value) in supplied {
            context = context.with_supplied(*name, SecretValue::new(*value));
        }
        Orchestrator::new(config(), self.cloud.clone(), self.store.clone())
            .with_sleeper(Arc::new(RecordingSleeper::default()))
            .with_context(context)
    }
}

const ALL_SUPPLIED: &[(&str, &str)] = &[
    ("API_KEY", "key-123"),
    ("DATABASE_URL", "postgres://db/shop"),
];

#[tokio::test]
async fn full_run_provisions_publishes_and_renders() {
    let project = python_service();
    let harness = Harness::new();

    let report = harness
        .orchestrator(ALL_SUPPLIED)
        .run(project.path(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.resources.len(), 5);
    assert!(
        report
            .resources
            .iter()
            .all(|r| r.state() == ResourceState::Bound)
    );

    let publish = report.publish.as_ref().unwrap();
    assert!(publish.is_complete());
    assert!(publish.unresolved.is_empty());
    let written: Vec<_> = publish.written.iter().map(String::as_str).collect();
    assert_eq!(
        written,
        vec![
            "API_KEY",
            "DATABASE_URL",
            "DEPLOY_SA_EMAIL",
            "GCP_PROJECT_ID",
            "GCP_REGION",
            "WIF_PROVIDER"
        ]
    );
    assert_eq!(
        harness.store.value("DATABASE_URL").as_deref(),
        Some("postgres://db/shop")
    );
    assert_eq!(
        harness.store.value("DEPLOY_SA_EMAIL").as_deref(),
        Some("gha-deployer@demo-project.iam.gserviceaccount.com")
    );

    let names = report.pipeline.as_ref().unwrap().names();
    let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(position("run-migrations") < position("deploy-cloud-run"));
    assert!(position("authenticate-gcp") < position("run-migrations"));

    let workflow = report.workflow.as_deref().unwrap();
    assert!(workflow.contains("${{ secrets.API_KEY }}"));
    assert!(!workflow.contains("key-123"));
    assert!(!workflow.contains("postgres://db/shop"));

    let manifest = report.secrets_manifest.as_deref().unwrap();
    assert!(manifest.contains("API_KEY"));
    assert!(!manifest.contains("key-123"));
}

#[tokio::test]
async fn missing_api_key_fails_generation_after_publishing_the_rest() {
    let project = python_service();
    let harness = Harness::new();

    let failure = harness
        .orchestrator(&[("DATABASE_URL", "postgres://db/shop")])
        .run(project.path(), RunOptions::default())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Generate);
    match &failure.error {
        OrchestrationError::Pipeline(PipelineError::UnresolvedSecrets { missing }) => {
            assert!(missing.contains("API_KEY"));
            assert!(!missing.contains("DATABASE_URL"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let converged = &failure.converged;
    assert_eq!(converged.resources.len(), 5);
    assert!(converged.unresolved_secrets.contains("API_KEY"));
    let publish = converged.publish.as_ref().unwrap();
    assert!(publish.unresolved.contains("API_KEY"));
    assert!(publish.written.contains("DATABASE_URL"));
    assert!(converged.workflow.is_none());
    assert!(harness.store.value("API_KEY").is_none());
}

#[tokio::test]
async fn secret_already_in_store_satisfies_generation() {
    let project = python_service();
    let harness = Harness::new();
    harness.store.seed("API_KEY", "from-an-earlier-run");

    let report = harness
        .orchestrator(&[("DATABASE_URL", "postgres://db/shop")])
        .run(project.path(), RunOptions::default())
        .await
        .unwrap();

    let publish = report.publish.as_ref().unwrap();
    assert!(publish.unresolved.contains("API_KEY"));
    assert!(report.available_secrets.contains("API_KEY"));
    assert!(report.workflow.unwrap().contains("${{ secrets.API_KEY }}"));
    assert_eq!(
        harness.store.value("API_KEY").as_deref(),
        Some("from-an-earlier-run")
    );
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let project = python_service();
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(ALL_SUPPLIED);

    let first = orchestrator
        .run(project.path(), RunOptions::default())
        .await
        .unwrap();
    let writes = harness.store.writes();
    let second = orchestrator
        .run(project.path(), RunOptions::default())
        .await
        .unwrap();

    assert!(second.publish.as_ref().unwrap().written.is_empty());
    assert_eq!(
        second.publish.as_ref().unwrap().skipped_existing.len(),
        first.publish.as_ref().unwrap().written.len()
    );
    assert_eq!(harness.store.writes(), writes);
    assert_eq!(harness.cloud.calls("create_service_account"), 1);
    assert_eq!(harness.cloud.calls("create_identity_pool"), 1);
    assert_eq!(harness.cloud.pool_ids().len(), 1);
    assert_eq!(first.workflow, second.workflow);
}

#[tokio::test]
async fn force_overwrites_existing_secrets() {
    let project = python_service();
    let harness = Harness::new();
    harness.store.seed("API_KEY", "stale");

    let report = harness
        .orchestrator(ALL_SUPPLIED)
        .publish(
            project.path(),
            RunOptions {
                force_overwrite: true,
            },
        )
        .await
        .unwrap();

    assert!(report.publish.unwrap().written.contains("API_KEY"));
    assert_eq!(harness.store.value("API_KEY").as_deref(), Some("key-123"));
    assert!(report.pipeline.is_none());
}

#[tokio::test]
async fn permission_denied_stops_before_any_secret_is_written() {
    let project = python_service();
    let harness = Harness::new();
    harness.cloud.deny("create_identity_pool");

    let failure = harness
        .orchestrator(ALL_SUPPLIED)
        .run(project.path(), RunOptions::default())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Provision);
    assert!(matches!(failure.error, OrchestrationError::Provision(_)));

    let kinds: Vec<_> = failure.converged.resources.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![ResourceKind::ServiceAccount, ResourceKind::IdentityPool]
    );
    assert!(failure.converged.resources[0].is_present());
    assert_eq!(
        failure.converged.resources[1].state(),
        ResourceState::Failed
    );
    assert!(failure.converged.publish.is_none());
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn listing_failure_stops_at_publish() {
    let project = python_service();
    let harness = Harness::new();
    harness.store.fail_listing("HTTP 403: Resource not accessible");

    let failure = harness
        .orchestrator(ALL_SUPPLIED)
        .run(project.path(), RunOptions::default())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Publish);
    assert_eq!(failure.converged.resources.len(), 5);
    assert!(!failure.converged.secret_names.is_empty());
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn generate_uses_stored_secrets_without_touching_the_cloud() {
    let project = python_service();
    let harness = Harness::new();
    for name in [
        "DEPLOY_SA_EMAIL",
        "GCP_PROJECT_ID",
        "GCP_REGION",
        "WIF_PROVIDER",
        "DATABASE_URL",
        "API_KEY",
    ] {
        harness.store.seed(name, "stored");
    }

    let report = harness
        .orchestrator(&[])
        .generate(project.path())
        .await
        .unwrap();

    assert!(report.workflow.is_some());
    assert!(report.resources.is_empty());
    assert_eq!(harness.cloud.calls("get_service_account"), 0);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn generate_without_stored_identity_secrets_fails() {
    let project = python_service();
    let harness = Harness::new();

    let failure = harness
        .orchestrator(ALL_SUPPLIED)
        .generate(project.path())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Generate);
    match &failure.error {
        OrchestrationError::Pipeline(PipelineError::UnresolvedSecrets { missing }) => {
            assert!(missing.contains("WIF_PROVIDER"));
            assert!(missing.contains("GCP_PROJECT_ID"));
            assert!(missing.contains("API_KEY"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn generate_rejects_supplied_secret_that_was_never_published() {
    let project = python_service();
    let harness = Harness::new();
    for name in [
        "DEPLOY_SA_EMAIL",
        "GCP_PROJECT_ID",
        "GCP_REGION",
        "WIF_PROVIDER",
        "DATABASE_URL",
    ] {
        harness.store.seed(name, "stored");
    }

    let failure = harness
        .orchestrator(ALL_SUPPLIED)
        .generate(project.path())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Generate);
    match &failure.error {
        OrchestrationError::Pipeline(PipelineError::UnresolvedSecrets { missing }) => {
            assert_eq!(missing.iter().collect::<Vec<_>>(), vec!["API_KEY"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(failure.converged.resolved_secrets.contains("API_KEY"));
    assert!(!failure.converged.available_secrets.contains("API_KEY"));
    assert!(failure.converged.workflow.is_none());
}

#[tokio::test]
async fn unknown_project_still_gets_a_pipeline() {
    let project = tempfile::tempdir().unwrap();
    write(project.path(), "README.md", "nothing to see\n");
    let harness = Harness::new();

    let report = harness
        .orchestrator(&[])
        .run(project.path(), RunOptions::default())
        .await
        .unwrap();

    assert!(!report.requirements.as_ref().unwrap().is_known());
    assert_eq!(report.pipeline.unwrap().names(), vec!["checkout"]);
}

#[tokio::test]
async fn run_command_writes_artifacts() {
    let project = python_service();
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(ALL_SUPPLIED);

    let output = execute_with(
        &orchestrator,
        &Commands::Run {
            path: project.path().to_path_buf(),
            force: false,
        },
    )
    .await
    .unwrap();

    let workflow = project.path().join(".github/workflows/deploy.yml");
    let manifest = project.path().join("launchpad-secrets.yaml");
    assert!(output.contains(&workflow.display().to_string()));
    assert!(
        fs::read_to_string(workflow)
            .unwrap()
            .starts_with("# Generated by launchpad")
    );
    assert!(fs::read_to_string(manifest).unwrap().contains("WIF_PROVIDER"));
}

#[tokio::test]
async fn manifest_command_needs_no_collaborators() {
    let project = python_service();
    let harness = Harness::new();

    let output = execute_with(
        &harness.orchestrator(&[]),
        &Commands::Manifest {
            path: project.path().to_path_buf(),
            stdout: true,
        },
    )
    .await
    .unwrap();

    assert!(output.contains("DATABASE_URL"));
    assert!(output.contains("runtime-detected"));
    assert_eq!(harness.cloud.calls("get_service_account"), 0);
    assert_eq!(harness.store.writes(), 0);
}
