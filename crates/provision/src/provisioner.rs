//! Convergence of the deploy identity and its federated trust binding.
//!
//! Each resource walks the same loop: check whether it exists, create it if
//! not, poll until the create is visible, and finally bind. Every step
//! short-circuits when the resource is already present, so re-running
//! [`InfrastructureProvisioner::ensure`] after a partial failure picks up
//! where the previous run stopped.

use std::future::Future;
use std::sync::Arc;

use launchpad_core::{
    DeployConfig, DeploymentTarget, InfrastructureResource, ProjectRequirements, ResourceKind,
    ResourceState,
};

use crate::client::{CloudError, CloudIdentityProvisioner, IamTarget, OidcProviderSpec, PoolState};
use crate::error::{ProvisionError, ProvisionFailure};
use crate::retry::{RetryError, RetryPolicy, Sleeper, TokioSleeper, retry_with_backoff};

/// Role letting a principal impersonate a service account.
pub const WORKLOAD_IDENTITY_USER: &str = "roles/iam.workloadIdentityUser";

const SERVICE_ACCOUNT_DISPLAY_NAME: &str = "launchpad deployer";
const POOL_DISPLAY_NAME: &str = "GitHub Actions";
const REPOSITORY_DESCRIPTION: &str = "Images pushed by the launchpad deploy workflow";

type TokenFn = dyn Fn() -> String + Send + Sync;

/// Service APIs that must be enabled before provisioning.
#[must_use]
pub fn required_services(requirements: &ProjectRequirements) -> Vec<&'static str> {
    let mut services = vec![
        "iam.googleapis.com",
        "iamcredentials.googleapis.com",
        "sts.googleapis.com",
    ];
    if requirements.deployment_target == DeploymentTarget::CloudRun {
        services.extend(["run.googleapis.com", "artifactregistry.googleapis.com"]);
    }
    services
}

/// Project roles granted to the deploy identity when none are configured.
#[must_use]
pub fn default_roles(requirements: &ProjectRequirements) -> Vec<String> {
    let mut roles = Vec::new();
    if requirements.deployment_target == DeploymentTarget::CloudRun {
        roles.extend([
            "roles/run.admin",
            "roles/iam.serviceAccountUser",
            "roles/artifactregistry.writer",
        ]);
    }
    if requirements.has_database_migrations {
        roles.push("roles/cloudsql.client");
    }
    roles.into_iter().map(String::from).collect()
}

/// Principal set matching every workflow token issued to `repository`.
#[must_use]
pub fn principal_set(project_number: &str, pool_id: &str, repository: &str) -> String {
    format!(
        "principalSet://iam.googleapis.com/projects/{project_number}/locations/global/workloadIdentityPools/{pool_id}/attribute.repository/{repository}"
    )
}

/// Whether `pool_id` was created by launchpad under `prefix`.
fn is_managed_pool(pool_id: &str, prefix: &str) -> bool {
    pool_id == prefix
        || pool_id
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()))
}

/// Creates or validates the deploy identity and its trust binding.
pub struct InfrastructureProvisioner {
    client: Arc<dyn CloudIdentityProvisioner>,
    sleeper: Arc<dyn Sleeper>,
    creation_token: Box<TokenFn>,
}

impl std::fmt::Debug for InfrastructureProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfrastructureProvisioner").finish_non_exhaustive()
    }
}

impl InfrastructureProvisioner {
    /// Provisioner using the tokio timer and UTC unix seconds as pool
    /// creation tokens.
    #[must_use]
    pub fn new(client: Arc<dyn CloudIdentityProvisioner>) -> Self {
        Self {
            client,
            sleeper: Arc::new(TokioSleeper),
            creation_token: Box::new(|| chrono::Utc::now().timestamp().to_string()),
        }
    }

    /// Replace the sleeper used between retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the source of pool creation tokens.
    #[must_use]
    pub fn with_creation_token(mut self, token: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.creation_token = Box::new(token);
        self
    }

    /// Converge all identity resources for `config.project_id`.
    ///
    /// Returns the resources in provisioning order: service account, identity
    /// pool, identity provider, trust binding, and for Cloud Run the Docker
    /// repository named after the pipeline's service.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisionFailure`] carrying the error and every resource
    /// converged before it; the resource being worked on is marked FAILED.
    #[tracing::instrument(
        name = "provision",
        skip_all,
        fields(project = %config.project_id, repository = %config.repository)
    )]
    pub async fn ensure(
        &self,
        requirements: &ProjectRequirements,
        config: &DeployConfig,
    ) -> Result<Vec<InfrastructureResource>, ProvisionFailure> {
        let run = Converge {
            client: self.client.as_ref(),
            sleeper: self.sleeper.as_ref(),
            policy: RetryPolicy::from(&config.retry),
            config,
        };
        let mut resources = Vec::new();
        match run
            .converge(requirements, &mut resources, self.creation_token.as_ref())
            .await
        {
            Ok(()) => {
                tracing::info!(resources = resources.len(), "Identity resources converged");
                Ok(resources)
            }
            Err(error) => {
                tracing::error!(error = %error, "Provisioning failed");
                Err(ProvisionFailure { error, resources })
            }
        }
    }
}

struct Converge<'a> {
    client: &'a dyn CloudIdentityProvisioner,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
    config: &'a DeployConfig,
}

/// Record the outcome of a step; a failed step leaves its resource FAILED.
fn settle<T>(
    resources: &mut Vec<InfrastructureResource>,
    mut resource: InfrastructureResource,
    outcome: Result<T, ProvisionError>,
) -> Result<T, ProvisionError> {
    if outcome.is_err()
        && let Err(err) = resource.mark_failed()
    {
        tracing::debug!(error = %err, "Resource already terminal");
    }
    resources.push(resource);
    outcome
}

impl Converge<'_> {
    fn project(&self) -> &str {
        &self.config.project_id
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        resource: &str,
        f: F,
    ) -> Result<T, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        retry_with_backoff(&self.policy, self.sleeper, operation, f)
            .await
            .map_err(|err| match err {
                RetryError::Fatal(CloudError::PermissionDenied { message }) => {
                    ProvisionError::PermissionDenied {
                        operation: operation.to_string(),
                        message,
                    }
                }
                RetryError::Fatal(last_error) => ProvisionError::Provisioning {
                    resource: resource.to_string(),
                    attempts: 1,
                    last_error,
                },
                RetryError::Exhausted {
                    attempts,
                    last_error,
                    ..
                } => ProvisionError::Provisioning {
                    resource: resource.to_string(),
                    attempts,
                    last_error,
                },
            })
    }

    async fn converge(
        &self,
        requirements: &ProjectRequirements,
        resources: &mut Vec<InfrastructureResource>,
        creation_token: &TokenFn,
    ) -> Result<(), ProvisionError> {
        let client = self.client;
        let project = self.project();
        let identity = &self.config.identity;

        for service in required_services(requirements) {
            self.call("enable service API", service, || {
                client.enable_service(project, service)
            })
            .await?;
        }
        tracing::debug!("Service APIs enabled");

        let project_number = self
            .call("look up project number", project, || {
                client.project_number(project)
            })
            .await?;

        let mut account =
            InfrastructureResource::absent(ResourceKind::ServiceAccount, &identity.service_account_id);
        let outcome = self.service_account(&mut account).await;
        let email = settle(resources, account, outcome)?;

        let mut pool = InfrastructureResource::absent(ResourceKind::IdentityPool, &identity.pool_prefix);
        let outcome = self.identity_pool(&mut pool, creation_token).await;
        let pool_id = settle(resources, pool, outcome)?;

        let mut provider =
            InfrastructureResource::absent(ResourceKind::IdentityProvider, &identity.provider_id);
        let outcome = self.identity_provider(&mut provider, &pool_id).await;
        settle(resources, provider, outcome)?;

        let roles = if identity.roles.is_empty() {
            default_roles(requirements)
        } else {
            identity.roles.clone()
        };
        if !roles.is_empty() {
            let member = format!("serviceAccount:{email}");
            let changed = self
                .grant(&IamTarget::Project, &roles, &member, "project roles")
                .await?;
            tracing::info!(roles = roles.len(), changed, "Project roles granted");
        }

        let mut binding = InfrastructureResource::absent(ResourceKind::IamBinding, WORKLOAD_IDENTITY_USER);
        let member = principal_set(&project_number, &pool_id, &self.config.repository.to_string());
        let outcome = self.trust_binding(&mut binding, &email, &member).await;
        settle(resources, binding, outcome)?;

        if requirements.deployment_target == DeploymentTarget::CloudRun {
            let mut repository = InfrastructureResource::absent(
                ResourceKind::ArtifactRepository,
                &self.config.pipeline.service_name,
            );
            let outcome = self.artifact_repository(&mut repository).await;
            settle(resources, repository, outcome)?;
        }

        for resource in resources.iter_mut() {
            if resource.state() == ResourceState::Exists {
                resource.mark_bound()?;
            }
        }
        Ok(())
    }

    async fn service_account(
        &self,
        resource: &mut InfrastructureResource,
    ) -> Result<String, ProvisionError> {
        let client = self.client;
        let project = self.project();
        let account_id = self.config.identity.service_account_id.as_str();

        let found = self
            .call("look up service account", account_id, || {
                client.get_service_account(project, account_id)
            })
            .await?;
        if let Some(account) = found {
            tracing::info!(email = %account.email, created = false, "Service account present");
            *resource =
                InfrastructureResource::existing(ResourceKind::ServiceAccount, account_id, &account.email);
            return Ok(account.email);
        }

        resource.mark_creating()?;
        self.call("create service account", account_id, || async move {
            match client
                .create_service_account(project, account_id, SERVICE_ACCOUNT_DISPLAY_NAME)
                .await
            {
                Err(CloudError::AlreadyExists { .. }) => Ok(()),
                other => other,
            }
        })
        .await?;

        let account = self
            .call("wait for service account", account_id, || async move {
                client
                    .get_service_account(project, account_id)
                    .await?
                    .ok_or_else(|| CloudError::not_found(format!("service account {account_id}")))
            })
            .await?;
        resource.mark_exists(&account.email)?;
        tracing::info!(email = %account.email, created = true, "Service account present");
        Ok(account.email)
    }

    async fn identity_pool(
        &self,
        resource: &mut InfrastructureResource,
        creation_token: &TokenFn,
    ) -> Result<String, ProvisionError> {
        let client = self.client;
        let project = self.project();
        let prefix = self.config.identity.pool_prefix.as_str();

        let pools = self
            .call("list identity pools", prefix, || client.list_identity_pools(project))
            .await?;
        let reusable = pools
            .into_iter()
            .filter(|p| p.state == PoolState::Active && is_managed_pool(&p.pool_id, prefix))
            .max_by(|a, b| a.pool_id.cmp(&b.pool_id));
        if let Some(pool) = reusable {
            tracing::info!(pool = %pool.pool_id, created = false, "Identity pool present");
            *resource =
                InfrastructureResource::existing(ResourceKind::IdentityPool, &pool.pool_id, &pool.name);
            return Ok(pool.pool_id);
        }

        let pool_id = format!("{prefix}-{}", creation_token());
        *resource = InfrastructureResource::absent(ResourceKind::IdentityPool, &pool_id);
        resource.mark_creating()?;
        let id = pool_id.as_str();
        self.call("create identity pool", id, || async move {
            match client.create_identity_pool(project, id, POOL_DISPLAY_NAME).await {
                Err(CloudError::AlreadyExists { .. }) => Ok(()),
                other => other,
            }
        })
        .await?;

        let pool = self
            .call("wait for identity pool", id, || async move {
                match client.get_identity_pool(project, id).await? {
                    Some(pool) if pool.state == PoolState::Active => Ok(pool),
                    _ => Err(CloudError::not_found(format!("identity pool {id}"))),
                }
            })
            .await?;
        resource.mark_exists(&pool.name)?;
        tracing::info!(pool = %pool_id, created = true, "Identity pool present");
        Ok(pool_id)
    }

    async fn identity_provider(
        &self,
        resource: &mut InfrastructureResource,
        pool_id: &str,
    ) -> Result<String, ProvisionError> {
        let client = self.client;
        let project = self.project();
        let identity = &self.config.identity;
        let provider_id = identity.provider_id.as_str();

        let found = self
            .call("look up identity provider", provider_id, || {
                client.get_identity_provider(project, pool_id, provider_id)
            })
            .await?;
        if let Some(provider) = found {
            tracing::info!(provider = %provider.name, created = false, "Identity provider present");
            *resource = InfrastructureResource::existing(
                ResourceKind::IdentityProvider,
                provider_id,
                &provider.name,
            );
            return Ok(provider.name);
        }

        resource.mark_creating()?;
        let spec = OidcProviderSpec::for_repository(
            &identity.issuer_uri,
            &self.config.repository.to_string(),
        );
        let spec = &spec;
        self.call("create identity provider", provider_id, || async move {
            match client
                .create_identity_provider(project, pool_id, provider_id, spec)
                .await
            {
                Err(CloudError::AlreadyExists { .. }) => Ok(()),
                other => other,
            }
        })
        .await?;

        let provider = self
            .call("wait for identity provider", provider_id, || async move {
                client
                    .get_identity_provider(project, pool_id, provider_id)
                    .await?
                    .ok_or_else(|| CloudError::not_found(format!("identity provider {provider_id}")))
            })
            .await?;
        resource.mark_exists(&provider.name)?;
        tracing::info!(provider = %provider.name, created = true, "Identity provider present");
        Ok(provider.name)
    }

    async fn artifact_repository(
        &self,
        resource: &mut InfrastructureResource,
    ) -> Result<(), ProvisionError> {
        let client = self.client;
        let project = self.project();
        let location = self.config.region.as_str();
        let repository_id = self.config.pipeline.service_name.as_str();

        let found = self
            .call("look up artifact repository", repository_id, || {
                client.get_artifact_repository(project, location, repository_id)
            })
            .await?;
        if let Some(repository) = found {
            tracing::info!(repository = %repository.name, created = false, "Artifact repository present");
            *resource = InfrastructureResource::existing(
                ResourceKind::ArtifactRepository,
                repository_id,
                &repository.name,
            );
            return Ok(());
        }

        resource.mark_creating()?;
        self.call("create artifact repository", repository_id, || async move {
            match client
                .create_artifact_repository(project, location, repository_id, REPOSITORY_DESCRIPTION)
                .await
            {
                Err(CloudError::AlreadyExists { .. }) => Ok(()),
                other => other,
            }
        })
        .await?;

        let repository = self
            .call("wait for artifact repository", repository_id, || async move {
                client
                    .get_artifact_repository(project, location, repository_id)
                    .await?
                    .ok_or_else(|| CloudError::not_found(format!("artifact repository {repository_id}")))
            })
            .await?;
        resource.mark_exists(&repository.name)?;
        tracing::info!(repository = %repository.name, created = true, "Artifact repository present");
        Ok(())
    }

    /// Add `member` to each role on `target`; the policy is written only when
    /// it changed. Returns whether it changed.
    async fn grant(
        &self,
        target: &IamTarget,
        roles: &[String],
        member: &str,
        label: &str,
    ) -> Result<bool, ProvisionError> {
        let client = self.client;
        let project = self.project();
        self.call("update IAM policy", label, || async move {
            let mut policy = client.get_iam_policy(project, target).await?;
            let mut changed = false;
            for role in roles {
                changed |= policy.add_member(role, member);
            }
            if changed {
                client.set_iam_policy(project, target, &policy).await?;
            }
            Ok(changed)
        })
        .await
    }

    async fn trust_binding(
        &self,
        resource: &mut InfrastructureResource,
        email: &str,
        member: &str,
    ) -> Result<(), ProvisionError> {
        let client = self.client;
        let project = self.project();
        let target = IamTarget::ServiceAccount(email.to_string());
        let target = &target;
        let roles = [WORKLOAD_IDENTITY_USER.to_string()];

        resource.mark_creating()?;
        let changed = self.grant(target, &roles, member, "trust binding").await?;
        if changed {
            self.call("wait for trust binding", "trust binding", || async move {
                let policy = client.get_iam_policy(project, target).await?;
                if policy.has_member(WORKLOAD_IDENTITY_USER, member) {
                    Ok(())
                } else {
                    Err(CloudError::not_found("trust binding propagation"))
                }
            })
            .await?;
            resource.mark_exists(member)?;
        } else {
            *resource =
                InfrastructureResource::existing(ResourceKind::IamBinding, WORKLOAD_IDENTITY_USER, member);
        }
        tracing::info!(member, created = changed, "Trust binding present");
        Ok(())
    }
}
