//! In-memory collaborators for tests.
//!
//! [`InMemoryCloud`] models the parts of the identity API the provisioner
//! relies on, including eventual consistency: a freshly created resource can
//! stay invisible for a configurable number of reads, and a freshly written
//! IAM policy can be served stale for a while.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    ArtifactRepository, CloudError, CloudIdentityProvisioner, IamPolicy, IamTarget, IdentityPool, IdentityProvider,
    OidcProviderSpec, PoolState, ServiceAccount,
};
use crate::retry::Sleeper;

/// Project number reported by [`InMemoryCloud`].
pub const PROJECT_NUMBER: &str = "123456789012";

#[derive(Debug, Default)]
struct CloudState {
    enabled_services: BTreeSet<String>,
    accounts: BTreeMap<String, ServiceAccount>,
    pools: BTreeMap<String, IdentityPool>,
    providers: BTreeMap<(String, String), IdentityProvider>,
    provider_specs: BTreeMap<(String, String), OidcProviderSpec>,
    repositories: BTreeMap<(String, String), ArtifactRepository>,
    policies: HashMap<IamTarget, IamPolicy>,
    stale_policies: HashMap<IamTarget, (IamPolicy, u32)>,
    invisible: HashMap<String, u32>,
    denied: BTreeSet<String>,
    transient: HashMap<String, u32>,
    calls: BTreeMap<String, usize>,
}

impl CloudState {
    fn enter(&mut self, operation: &str) -> Result<(), CloudError> {
        *self.calls.entry(operation.to_string()).or_default() += 1;
        if self.denied.contains(operation) {
            return Err(CloudError::PermissionDenied {
                message: format!("Permission denied for {operation}"),
            });
        }
        if let Some(remaining) = self.transient.get_mut(operation)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(CloudError::transient(format!("{operation} unavailable")));
        }
        Ok(())
    }

    /// Whether a read of `key` should still miss a recent create.
    fn hidden(&mut self, key: &str) -> bool {
        match self.invisible.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-memory [`CloudIdentityProvisioner`].
#[derive(Debug, Default)]
pub struct InMemoryCloud {
    visibility_lag: u32,
    state: Mutex<CloudState>,
}

impl InMemoryCloud {
    /// Empty project with immediately consistent reads.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Created resources and written policies stay invisible for `reads`
    /// subsequent reads.
    #[must_use]
    pub fn with_visibility_lag(mut self, reads: u32) -> Self {
        self.visibility_lag = reads;
        self
    }

    /// Fail every call to `operation` with permission denied.
    pub fn deny(&self, operation: &str) {
        self.state.lock().unwrap().denied.insert(operation.to_string());
    }

    /// Fail the next `times` calls to `operation` with a transient error.
    pub fn fail_transiently(&self, operation: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .transient
            .insert(operation.to_string(), times);
    }

    /// Number of calls made to `operation`, including failed ones.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    /// Seed an existing service account.
    pub fn seed_service_account(&self, project: &str, account_id: &str) {
        let account = ServiceAccount {
            email: format!("{account_id}@{project}.iam.gserviceaccount.com"),
            account_id: account_id.to_string(),
        };
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(account_id.to_string(), account);
    }

    /// Seed an existing pool.
    pub fn seed_pool(&self, pool_id: &str, state: PoolState) {
        let pool = IdentityPool {
            pool_id: pool_id.to_string(),
            name: pool_name(pool_id),
            state,
        };
        self.state
            .lock()
            .unwrap()
            .pools
            .insert(pool_id.to_string(), pool);
    }

    /// Seed an existing provider.
    pub fn seed_provider(&self, pool_id: &str, provider_id: &str) {
        let provider = IdentityProvider {
            provider_id: provider_id.to_string(),
            name: provider_name(pool_id, provider_id),
        };
        self.state
            .lock()
            .unwrap()
            .providers
            .insert((pool_id.to_string(), provider_id.to_string()), provider);
    }

    /// Seed an existing Docker repository.
    pub fn seed_artifact_repository(&self, location: &str, repository_id: &str) {
        let repository = ArtifactRepository {
            repository_id: repository_id.to_string(),
            name: repository_name(location, repository_id),
        };
        self.state
            .lock()
            .unwrap()
            .repositories
            .insert((location.to_string(), repository_id.to_string()), repository);
    }

    /// Repositories as `(location, id)` pairs.
    #[must_use]
    pub fn artifact_repositories(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .repositories
            .keys()
            .cloned()
            .collect()
    }

    /// Replace the policy of a target.
    pub fn seed_policy(&self, target: &IamTarget, policy: IamPolicy) {
        self.state
            .lock()
            .unwrap()
            .policies
            .insert(target.clone(), policy);
    }

    /// Current policy of a target.
    #[must_use]
    pub fn policy(&self, target: &IamTarget) -> IamPolicy {
        self.state
            .lock()
            .unwrap()
            .policies
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    /// Enabled service APIs.
    #[must_use]
    pub fn enabled_services(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().enabled_services.clone()
    }

    /// Ids of every pool, including deleted ones.
    #[must_use]
    pub fn pool_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().pools.keys().cloned().collect()
    }

    /// Spec a provider was created with.
    #[must_use]
    pub fn provider_spec(&self, pool_id: &str, provider_id: &str) -> Option<OidcProviderSpec> {
        self.state
            .lock()
            .unwrap()
            .provider_specs
            .get(&(pool_id.to_string(), provider_id.to_string()))
            .cloned()
    }
}

fn pool_name(pool_id: &str) -> String {
    format!("projects/{PROJECT_NUMBER}/locations/global/workloadIdentityPools/{pool_id}")
}

fn provider_name(pool_id: &str, provider_id: &str) -> String {
    format!("{}/providers/{provider_id}", pool_name(pool_id))
}

fn repository_name(location: &str, repository_id: &str) -> String {
    format!("projects/{PROJECT_NUMBER}/locations/{location}/repositories/{repository_id}")
}

#[async_trait]
impl CloudIdentityProvisioner for InMemoryCloud {
    async fn enable_service(&self, _project: &str, service: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("enable_service")?;
        state.enabled_services.insert(service.to_string());
        Ok(())
    }

    async fn project_number(&self, _project: &str) -> Result<String, CloudError> {
        self.state.lock().unwrap().enter("project_number")?;
        Ok(PROJECT_NUMBER.to_string())
    }

    async fn get_service_account(
        &self,
        _project: &str,
        account_id: &str,
    ) -> Result<Option<ServiceAccount>, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_service_account")?;
        if state.hidden(&format!("sa/{account_id}")) {
            return Ok(None);
        }
        Ok(state.accounts.get(account_id).cloned())
    }

    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        _display_name: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_service_account")?;
        if state.accounts.contains_key(account_id) {
            return Err(CloudError::AlreadyExists {
                resource: account_id.to_string(),
            });
        }
        state.accounts.insert(
            account_id.to_string(),
            ServiceAccount {
                email: format!("{account_id}@{project}.iam.gserviceaccount.com"),
                account_id: account_id.to_string(),
            },
        );
        state
            .invisible
            .insert(format!("sa/{account_id}"), self.visibility_lag);
        Ok(())
    }

    async fn list_identity_pools(&self, _project: &str) -> Result<Vec<IdentityPool>, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("list_identity_pools")?;
        Ok(state.pools.values().cloned().collect())
    }

    async fn get_identity_pool(
        &self,
        _project: &str,
        pool_id: &str,
    ) -> Result<Option<IdentityPool>, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_identity_pool")?;
        if state.hidden(&format!("pool/{pool_id}")) {
            return Ok(None);
        }
        Ok(state.pools.get(pool_id).cloned())
    }

    async fn create_identity_pool(
        &self,
        _project: &str,
        pool_id: &str,
        _display_name: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_identity_pool")?;
        if state.pools.contains_key(pool_id) {
            return Err(CloudError::AlreadyExists {
                resource: pool_id.to_string(),
            });
        }
        state.pools.insert(
            pool_id.to_string(),
            IdentityPool {
                pool_id: pool_id.to_string(),
                name: pool_name(pool_id),
                state: PoolState::Active,
            },
        );
        state
            .invisible
            .insert(format!("pool/{pool_id}"), self.visibility_lag);
        Ok(())
    }

    async fn get_identity_provider(
        &self,
        _project: &str,
        pool_id: &str,
        provider_id: &str,
    ) -> Result<Option<IdentityProvider>, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_identity_provider")?;
        if state.hidden(&format!("provider/{pool_id}/{provider_id}")) {
            return Ok(None);
        }
        Ok(state
            .providers
            .get(&(pool_id.to_string(), provider_id.to_string()))
            .cloned())
    }

    async fn create_identity_provider(
        &self,
        _project: &str,
        pool_id: &str,
        provider_id: &str,
        spec: &OidcProviderSpec,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_identity_provider")?;
        if !state.pools.contains_key(pool_id) {
            return Err(CloudError::not_found(format!("identity pool {pool_id}")));
        }
        let key = (pool_id.to_string(), provider_id.to_string());
        if state.providers.contains_key(&key) {
            return Err(CloudError::AlreadyExists {
                resource: provider_id.to_string(),
            });
        }
        state.providers.insert(
            key.clone(),
            IdentityProvider {
                provider_id: provider_id.to_string(),
                name: provider_name(pool_id, provider_id),
            },
        );
        state.provider_specs.insert(key, spec.clone());
        state
            .invisible
            .insert(format!("provider/{pool_id}/{provider_id}"), self.visibility_lag);
        Ok(())
    }

    async fn get_artifact_repository(
        &self,
        _project: &str,
        location: &str,
        repository_id: &str,
    ) -> Result<Option<ArtifactRepository>, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_artifact_repository")?;
        if state.hidden(&format!("repository/{location}/{repository_id}")) {
            return Ok(None);
        }
        Ok(state
            .repositories
            .get(&(location.to_string(), repository_id.to_string()))
            .cloned())
    }

    async fn create_artifact_repository(
        &self,
        _project: &str,
        location: &str,
        repository_id: &str,
        _description: &str,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("create_artifact_repository")?;
        if !state
            .enabled_services
            .contains("artifactregistry.googleapis.com")
        {
            return Err(CloudError::other("Artifact Registry API has not been used in project"));
        }
        let key = (location.to_string(), repository_id.to_string());
        if state.repositories.contains_key(&key) {
            return Err(CloudError::AlreadyExists {
                resource: repository_id.to_string(),
            });
        }
        state.repositories.insert(
            key,
            ArtifactRepository {
                repository_id: repository_id.to_string(),
                name: repository_name(location, repository_id),
            },
        );
        state
            .invisible
            .insert(format!("repository/{location}/{repository_id}"), self.visibility_lag);
        Ok(())
    }

    async fn get_iam_policy(
        &self,
        _project: &str,
        target: &IamTarget,
    ) -> Result<IamPolicy, CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("get_iam_policy")?;
        if let Some((stale, remaining)) = state.stale_policies.get_mut(target)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(stale.clone());
        }
        let mut policy = state.policies.get(target).cloned().unwrap_or_default();
        if policy.etag.is_none() {
            policy.etag = Some("etag-0".to_string());
        }
        Ok(policy)
    }

    async fn set_iam_policy(
        &self,
        _project: &str,
        target: &IamTarget,
        policy: &IamPolicy,
    ) -> Result<(), CloudError> {
        let mut state = self.state.lock().unwrap();
        state.enter("set_iam_policy")?;
        let current = state.policies.get(target).cloned().unwrap_or_default();
        let current_etag = current.etag.clone().unwrap_or_else(|| "etag-0".to_string());
        if policy.etag.as_deref() != Some(current_etag.as_str()) {
            return Err(CloudError::transient("There were concurrent policy changes"));
        }
        let generation: u64 = current_etag
            .trim_start_matches("etag-")
            .parse()
            .unwrap_or_default();
        let mut stored = policy.clone();
        stored.etag = Some(format!("etag-{}", generation + 1));
        state
            .stale_policies
            .insert(target.clone(), (current, self.visibility_lag));
        state.policies.insert(target.clone(), stored);
        Ok(())
    }
}

/// [`Sleeper`] that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Delays requested so far.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
