//! [`CloudIdentityProvisioner`] backed by the `gcloud` CLI.
//!
//! Every invocation passes `--project` and `--format=json` explicitly and is
//! bounded by a timeout. Nothing is read from `gcloud config`.

use std::ffi::OsString;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;

use crate::client::{
    ArtifactRepository, CloudError, CloudIdentityProvisioner, IamPolicy, IamTarget, IdentityPool, IdentityProvider,
    OidcProviderSpec, PoolState, ServiceAccount,
};

const LOCATION: &str = "--location=global";

/// Shells out to `gcloud`.
#[derive(Debug, Clone)]
pub struct GcloudCli {
    binary: String,
    timeout: Duration,
}

impl GcloudCli {
    /// Create a client invoking `binary` with a per-call `timeout`.
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run<I, S>(&self, project: &str, args: I) -> Result<String, CloudError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let description = args
            .iter()
            .take(4)
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(command = %description, project, "Running gcloud");

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .arg(format!("--project={project}"))
            .arg("--format=json")
            .arg("--quiet")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                CloudError::transient(format!(
                    "gcloud {description} timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| CloudError::other(format!("Failed to execute {}: {e}", self.binary)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let err = classify_failure(&description, stderr.trim());
        tracing::debug!(command = %description, error = %err, "gcloud call failed");
        Err(err)
    }

    async fn run_json<T, I, S>(&self, project: &str, args: I) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let stdout = self.run(project, args).await?;
        parse_json(&stdout)
    }

    /// Run a describe-style call, mapping not-found to `None`.
    async fn describe<T, I, S>(&self, project: &str, args: I) -> Result<Option<T>, CloudError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        match self.run_json(project, args).await {
            Ok(value) => Ok(Some(value)),
            Err(CloudError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &str) -> Result<T, CloudError> {
    serde_json::from_str(stdout)
        .map_err(|e| CloudError::other(format!("Unexpected gcloud output: {e}")))
}

/// Map gcloud stderr onto a [`CloudError`] class.
#[must_use]
pub fn classify_failure(command: &str, stderr: &str) -> CloudError {
    let upper = stderr.to_ascii_uppercase();
    let has = |needles: &[&str]| needles.iter().any(|n| upper.contains(n));

    if has(&["PERMISSION_DENIED", "DOES NOT HAVE PERMISSION", "HTTP 403"]) {
        CloudError::PermissionDenied {
            message: stderr.to_string(),
        }
    } else if has(&["CONCURRENT POLICY CHANGES", "ABORTED", "HTTP 412"]) {
        CloudError::transient(stderr)
    } else if has(&["ALREADY_EXISTS", "ALREADY EXISTS", "HTTP 409"]) {
        CloudError::AlreadyExists {
            resource: command.to_string(),
        }
    } else if has(&["NOT_FOUND", "NOT FOUND", "HTTP 404"]) {
        CloudError::not_found(command)
    } else if has(&[
        "UNAVAILABLE",
        "DEADLINE_EXCEEDED",
        "RESOURCE_EXHAUSTED",
        "INTERNAL:",
        "HTTP 429",
        "HTTP 500",
        "HTTP 503",
        "TIMED OUT",
        "CONNECTION RESET",
    ]) {
        CloudError::transient(stderr)
    } else {
        CloudError::other(stderr)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDescription {
    project_number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountDescription {
    email: String,
}

#[derive(Deserialize)]
struct NamedResource {
    name: String,
    #[serde(default)]
    state: Option<String>,
}

fn last_segment(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

impl From<NamedResource> for IdentityPool {
    fn from(value: NamedResource) -> Self {
        let state = match value.state.as_deref() {
            Some("DELETED") => PoolState::Deleted,
            _ => PoolState::Active,
        };
        Self {
            pool_id: last_segment(&value.name),
            name: value.name,
            state,
        }
    }
}

fn account_from(email: String) -> ServiceAccount {
    let account_id = email.split('@').next().unwrap_or_default().to_string();
    ServiceAccount { email, account_id }
}

fn account_email(project: &str, account_id: &str) -> String {
    format!("{account_id}@{project}.iam.gserviceaccount.com")
}

#[async_trait]
impl CloudIdentityProvisioner for GcloudCli {
    async fn enable_service(&self, project: &str, service: &str) -> Result<(), CloudError> {
        self.run(project, ["services", "enable", service]).await?;
        Ok(())
    }

    async fn project_number(&self, project: &str) -> Result<String, CloudError> {
        let description: ProjectDescription = self
            .run_json(project, ["projects", "describe", project])
            .await?;
        Ok(description.project_number)
    }

    async fn get_service_account(
        &self,
        project: &str,
        account_id: &str,
    ) -> Result<Option<ServiceAccount>, CloudError> {
        let email = account_email(project, account_id);
        let found: Option<ServiceAccountDescription> = self
            .describe(project, ["iam", "service-accounts", "describe", email.as_str()])
            .await?;
        Ok(found.map(|d| account_from(d.email)))
    }

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<(), CloudError> {
        let display = format!("--display-name={display_name}");
        self.run(
            project,
            ["iam", "service-accounts", "create", account_id, display.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn list_identity_pools(&self, project: &str) -> Result<Vec<IdentityPool>, CloudError> {
        let pools: Vec<NamedResource> = self
            .run_json(
                project,
                [
                    "iam",
                    "workload-identity-pools",
                    "list",
                    LOCATION,
                    "--show-deleted",
                ],
            )
            .await?;
        Ok(pools.into_iter().map(IdentityPool::from).collect())
    }

    async fn get_identity_pool(
        &self,
        project: &str,
        pool_id: &str,
    ) -> Result<Option<IdentityPool>, CloudError> {
        let found: Option<NamedResource> = self
            .describe(
                project,
                ["iam", "workload-identity-pools", "describe", pool_id, LOCATION],
            )
            .await?;
        Ok(found.map(IdentityPool::from))
    }

    async fn create_identity_pool(
        &self,
        project: &str,
        pool_id: &str,
        display_name: &str,
    ) -> Result<(), CloudError> {
        let display = format!("--display-name={display_name}");
        self.run(
            project,
            [
                "iam",
                "workload-identity-pools",
                "create",
                pool_id,
                LOCATION,
                display.as_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_identity_provider(
        &self,
        project: &str,
        pool_id: &str,
        provider_id: &str,
    ) -> Result<Option<IdentityProvider>, CloudError> {
        let pool = format!("--workload-identity-pool={pool_id}");
        let found: Option<NamedResource> = self
            .describe(
                project,
                [
                    "iam",
                    "workload-identity-pools",
                    "providers",
                    "describe",
                    provider_id,
                    pool.as_str(),
                    LOCATION,
                ],
            )
            .await?;
        Ok(found.map(|r| IdentityProvider {
            provider_id: last_segment(&r.name),
            name: r.name,
        }))
    }

    async fn create_identity_provider(
        &self,
        project: &str,
        pool_id: &str,
        provider_id: &str,
        spec: &OidcProviderSpec,
    ) -> Result<(), CloudError> {
        let pool = format!("--workload-identity-pool={pool_id}");
        let issuer = format!("--issuer-uri={}", spec.issuer_uri);
        let mapping = format!("--attribute-mapping={}", spec.mapping_arg());
        let condition = format!("--attribute-condition={}", spec.attribute_condition);
        self.run(
            project,
            [
                "iam",
                "workload-identity-pools",
                "providers",
                "create-oidc",
                provider_id,
                pool.as_str(),
                LOCATION,
                issuer.as_str(),
                mapping.as_str(),
                condition.as_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_artifact_repository(
        &self,
        project: &str,
        location: &str,
        repository_id: &str,
    ) -> Result<Option<ArtifactRepository>, CloudError> {
        let location = format!("--location={location}");
        let found: Option<NamedResource> = self
            .describe(
                project,
                [
                    "artifacts",
                    "repositories",
                    "describe",
                    repository_id,
                    location.as_str(),
                ],
            )
            .await?;
        Ok(found.map(|r| ArtifactRepository {
            repository_id: last_segment(&r.name),
            name: r.name,
        }))
    }

    async fn create_artifact_repository(
        &self,
        project: &str,
        location: &str,
        repository_id: &str,
        description: &str,
    ) -> Result<(), CloudError> {
        let location = format!("--location={location}");
        let description = format!("--description={description}");
        self.run(
            project,
            [
                "artifacts",
                "repositories",
                "create",
                repository_id,
                "--repository-format=docker",
                location.as_str(),
                description.as_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_iam_policy(
        &self,
        project: &str,
        target: &IamTarget,
    ) -> Result<IamPolicy, CloudError> {
        match target {
            IamTarget::Project => {
                self.run_json(project, ["projects", "get-iam-policy", project])
                    .await
            }
            IamTarget::ServiceAccount(email) => {
                self.run_json(
                    project,
                    ["iam", "service-accounts", "get-iam-policy", email.as_str()],
                )
                .await
            }
        }
    }

    async fn set_iam_policy(
        &self,
        project: &str,
        target: &IamTarget,
        policy: &IamPolicy,
    ) -> Result<(), CloudError> {
        let body = serde_json::to_vec(policy)
            .map_err(|e| CloudError::other(format!("Failed to encode IAM policy: {e}")))?;
        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| CloudError::other(format!("Failed to stage IAM policy: {e}")))?;
        file.write_all(&body)
            .map_err(|e| CloudError::other(format!("Failed to stage IAM policy: {e}")))?;
        let policy_path = file.path().as_os_str().to_os_string();

        let mut args: Vec<OsString> = match target {
            IamTarget::Project => vec!["projects".into(), "set-iam-policy".into(), project.into()],
            IamTarget::ServiceAccount(email) => vec![
                "iam".into(),
                "service-accounts".into(),
                "set-iam-policy".into(),
                email.into(),
            ],
        };
        args.push(policy_path);
        self.run(project, args).await?;
        Ok(())
    }
}
