//! The fixed catalog of candidate deploy steps.
//!
//! Catalog order is the tie-break order of the generated pipeline. Actions
//! and scripts are rendered from [`ProjectRequirements`] but each step's
//! condition alone decides whether it is selected.

use std::path::{Path, PathBuf};

use launchpad_core::{DeploymentTarget, MigrationTool, ProjectRequirements, ProjectType};

use crate::condition::Condition;
use crate::step::{PipelineStep, secret_expression};

/// Step names in catalog order.
pub const STEP_NAMES: [&str; 12] = [
    CHECKOUT,
    SETUP_TOOLCHAIN,
    INSTALL_DEPENDENCIES,
    RUN_TESTS,
    AUTHENTICATE_GCP,
    AUTHENTICATE_AWS,
    AUTHENTICATE_AZURE,
    BUILD_IMAGE,
    RUN_MIGRATIONS,
    DEPLOY_CLOUD_RUN,
    DEPLOY_ECS,
    DEPLOY_ACI,
];

/// Check out the repository.
pub const CHECKOUT: &str = "checkout";
/// Install the language toolchain.
pub const SETUP_TOOLCHAIN: &str = "setup-toolchain";
/// Install project dependencies.
pub const INSTALL_DEPENDENCIES: &str = "install-dependencies";
/// Run the test suite.
pub const RUN_TESTS: &str = "run-tests";
/// Exchange the workflow token for cloud credentials.
pub const AUTHENTICATE_GCP: &str = "authenticate-gcp";
/// Assume the deploy role in AWS.
pub const AUTHENTICATE_AWS: &str = "authenticate-aws";
/// Log in to Azure with a federated credential.
pub const AUTHENTICATE_AZURE: &str = "authenticate-azure";
/// Build and push the container image.
pub const BUILD_IMAGE: &str = "build-image";
/// Apply database migrations.
pub const RUN_MIGRATIONS: &str = "run-migrations";
/// Deploy to Cloud Run.
pub const DEPLOY_CLOUD_RUN: &str = "deploy-cloud-run";
/// Deploy to ECS.
pub const DEPLOY_ECS: &str = "deploy-ecs";
/// Deploy to Azure Container Instances.
pub const DEPLOY_ACI: &str = "deploy-aci";

const IMAGE_SCRIPT: &str = r#"IMAGE="${GCP_REGION}-docker.pkg.dev/${GCP_PROJECT_ID}/${SERVICE_NAME}/${SERVICE_NAME}:${GITHUB_SHA}"
gcloud auth configure-docker "${GCP_REGION}-docker.pkg.dev" --quiet
docker build -t "$IMAGE" .
docker push "$IMAGE"
echo "IMAGE=$IMAGE" >> "$GITHUB_ENV""#;

const ACI_SCRIPT: &str = r#"FILE=aci.yaml
[ -f "$FILE" ] || FILE=container-group.yaml
az container create --resource-group "$AZURE_RESOURCE_GROUP" --file "$FILE""#;

/// Every candidate step, in catalog order.
#[must_use]
pub fn candidates(requirements: &ProjectRequirements) -> Vec<PipelineStep> {
    let runtime_secrets: Vec<&str> = requirements
        .detected_env_vars
        .iter()
        .map(String::as_str)
        .collect();

    vec![
        PipelineStep::uses(CHECKOUT, "Checkout", "actions/checkout@v4"),
        setup_toolchain(requirements)
            .after(&[CHECKOUT])
            .when(Condition::ProjectKnown),
        PipelineStep::run(
            INSTALL_DEPENDENCIES,
            "Install dependencies",
            install_command(requirements),
        )
        .after(&[SETUP_TOOLCHAIN])
        .when(Condition::ProjectKnown),
        PipelineStep::run(RUN_TESTS, "Run tests", test_command(requirements))
            .after(&[INSTALL_DEPENDENCIES])
            .when(Condition::ProjectKnown),
        PipelineStep::uses(
            AUTHENTICATE_GCP,
            "Authenticate to Google Cloud",
            "google-github-actions/auth@v2",
        )
        .after(&[CHECKOUT])
        .when(Condition::TargetIs(DeploymentTarget::CloudRun))
        .with_secret_input("workload_identity_provider", "WIF_PROVIDER")
        .with_secret_input("service_account", "DEPLOY_SA_EMAIL"),
        PipelineStep::uses(
            AUTHENTICATE_AWS,
            "Configure AWS credentials",
            "aws-actions/configure-aws-credentials@v4",
        )
        .after(&[CHECKOUT])
        .when(Condition::TargetIs(DeploymentTarget::Ecs))
        .with_secret_input("role-to-assume", "AWS_ROLE_ARN")
        .with_secret_input("aws-region", "AWS_REGION"),
        PipelineStep::uses(AUTHENTICATE_AZURE, "Log in to Azure", "azure/login@v2")
            .after(&[CHECKOUT])
            .when(Condition::TargetIs(DeploymentTarget::Aci))
            .with_secret_input("client-id", "AZURE_CLIENT_ID")
            .with_secret_input("tenant-id", "AZURE_TENANT_ID")
            .with_secret_input("subscription-id", "AZURE_SUBSCRIPTION_ID"),
        PipelineStep::run(BUILD_IMAGE, "Build and push image", IMAGE_SCRIPT)
            .after(&[RUN_TESTS, AUTHENTICATE_GCP])
            .when(Condition::All(vec![
                Condition::HasDockerfile,
                Condition::TargetIs(DeploymentTarget::CloudRun),
            ]))
            .with_secret_env(["GCP_PROJECT_ID", "GCP_REGION"]),
        PipelineStep::run(
            RUN_MIGRATIONS,
            "Run database migrations",
            requirements
                .migration_tool
                .unwrap_or(MigrationTool::Generic)
                .apply_command(),
        )
        .after(&[RUN_TESTS, AUTHENTICATE_GCP])
        .when(Condition::HasMigrations)
        .with_secret_env(runtime_secrets.iter().copied()),
        deploy_cloud_run(requirements, &runtime_secrets),
        PipelineStep::uses(
            DEPLOY_ECS,
            "Deploy to Amazon ECS",
            "aws-actions/amazon-ecs-deploy-task-definition@v2",
        )
        .after(&[AUTHENTICATE_AWS, RUN_TESTS, RUN_MIGRATIONS])
        .when(Condition::TargetIs(DeploymentTarget::Ecs))
        .with_input("task-definition", "task-definition.json")
        .with_input("service", "${{ env.SERVICE_NAME }}")
        .with_input("cluster", "${{ vars.ECS_CLUSTER }}")
        .with_input("wait-for-service-stability", "true")
        .with_secret_env(runtime_secrets.iter().copied()),
        PipelineStep::run(
            DEPLOY_ACI,
            "Deploy to Azure Container Instances",
            ACI_SCRIPT,
        )
        .after(&[AUTHENTICATE_AZURE, RUN_TESTS, RUN_MIGRATIONS])
        .when(Condition::TargetIs(DeploymentTarget::Aci))
        .with_env("AZURE_RESOURCE_GROUP", "${{ vars.AZURE_RESOURCE_GROUP }}")
        .with_secret_env(runtime_secrets.iter().copied()),
    ]
}

fn deploy_cloud_run(requirements: &ProjectRequirements, runtime_secrets: &[&str]) -> PipelineStep {
    let mut step = PipelineStep::uses(
        DEPLOY_CLOUD_RUN,
        "Deploy to Cloud Run",
        "google-github-actions/deploy-cloudrun@v2",
    )
    .after(&[AUTHENTICATE_GCP, BUILD_IMAGE, RUN_MIGRATIONS, RUN_TESTS])
    .when(Condition::TargetIs(DeploymentTarget::CloudRun))
    .with_input("service", "${{ env.SERVICE_NAME }}")
    .with_secret_input("region", "GCP_REGION")
    .with_secret_input("project_id", "GCP_PROJECT_ID");

    step = if requirements.has_dockerfile {
        step.with_input("image", "${{ env.IMAGE }}")
    } else {
        step.with_input("source", ".")
    };

    if !runtime_secrets.is_empty() {
        let env_vars = runtime_secrets
            .iter()
            .map(|name| format!("{name}={}", secret_expression(name)))
            .collect::<Vec<_>>()
            .join("\n");
        step = step
            .with_input("env_vars", env_vars)
            .with_secret_refs(runtime_secrets.iter().copied());
    }
    step
}

fn setup_toolchain(requirements: &ProjectRequirements) -> PipelineStep {
    let step = |action: &str| PipelineStep::uses(SETUP_TOOLCHAIN, "Set up toolchain", action);
    let project_dir = primary_manifest(requirements).and_then(manifest_dir);
    match requirements.project_type {
        ProjectType::Python => {
            step("actions/setup-python@v5").with_input("python-version", "3.12")
        }
        ProjectType::Node => {
            let node = step("actions/setup-node@v4")
                .with_input("node-version", "20")
                .with_input("cache", "npm");
            match project_dir {
                Some(dir) => node.with_input(
                    "cache-dependency-path",
                    dir.join("package-lock.json").display().to_string(),
                ),
                None => node,
            }
        }
        ProjectType::Java => step("actions/setup-java@v4")
            .with_input("distribution", "temurin")
            .with_input("java-version", "21"),
        ProjectType::Go => step("actions/setup-go@v5").with_input(
            "go-version-file",
            primary_manifest(requirements)
                .map_or_else(|| "go.mod".to_string(), |m| m.display().to_string()),
        ),
        ProjectType::Rust => step("dtolnay/rust-toolchain@stable"),
        ProjectType::Ruby => {
            let ruby = step("ruby/setup-ruby@v1").with_input("bundler-cache", "true");
            match project_dir {
                Some(dir) => ruby.with_input("working-directory", dir.display().to_string()),
                None => ruby,
            }
        }
        ProjectType::Unknown => PipelineStep::run(
            SETUP_TOOLCHAIN,
            "Set up toolchain",
            "echo 'No toolchain detected'",
        ),
    }
}

/// Shallowest manifest of the detected ecosystem; commands run beside it.
fn primary_manifest(requirements: &ProjectRequirements) -> Option<&Path> {
    requirements
        .dependency_manifest_paths
        .iter()
        .min_by(|a, b| (a.components().count(), a).cmp(&(b.components().count(), b)))
        .map(PathBuf::as_path)
}

fn manifest_dir(manifest: &Path) -> Option<&Path> {
    manifest.parent().filter(|dir| !dir.as_os_str().is_empty())
}

fn manifest_named(requirements: &ProjectRequirements, name: &str) -> bool {
    primary_manifest(requirements)
        .and_then(Path::file_name)
        .is_some_and(|f| f == name)
}

/// `command`, run from the directory holding the primary manifest.
fn beside_manifest(requirements: &ProjectRequirements, command: &str) -> String {
    match primary_manifest(requirements).and_then(manifest_dir) {
        Some(dir) => format!("cd {} && {command}", dir.display()),
        None => command.to_string(),
    }
}

fn uses_maven(requirements: &ProjectRequirements) -> bool {
    manifest_named(requirements, "pom.xml")
}

fn install_command(requirements: &ProjectRequirements) -> String {
    let command = match requirements.project_type {
        ProjectType::Python => {
            if manifest_named(requirements, "requirements.txt") {
                "pip install -r requirements.txt"
            } else if manifest_named(requirements, "Pipfile") {
                "pip install pipenv && pipenv install --deploy --system"
            } else {
                "pip install ."
            }
        }
        ProjectType::Node => "npm ci",
        ProjectType::Java if uses_maven(requirements) => "mvn -B dependency:go-offline",
        ProjectType::Java => "gradle dependencies",
        ProjectType::Go => "go mod download",
        ProjectType::Rust => "cargo fetch --locked",
        ProjectType::Ruby => "bundle install",
        ProjectType::Unknown => return "true".to_string(),
    };
    beside_manifest(requirements, command)
}

fn test_command(requirements: &ProjectRequirements) -> String {
    let command = match requirements.project_type {
        ProjectType::Python => "python -m pytest",
        ProjectType::Node => "npm test",
        ProjectType::Java if uses_maven(requirements) => "mvn -B test",
        ProjectType::Java => "gradle test",
        ProjectType::Go => "go test ./...",
        ProjectType::Rust => "cargo test --locked",
        ProjectType::Ruby => "bundle exec rake test",
        ProjectType::Unknown => return "true".to_string(),
    };
    beside_manifest(requirements, command)
}
