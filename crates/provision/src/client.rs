//! Contract with the cloud identity API.
//!
//! The provisioner only talks to the cloud through [`CloudIdentityProvisioner`].
//! Every method takes the project id explicitly; implementations must not fall
//! back to any ambient "current project".

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a cloud collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum CloudError {
    /// The resource does not exist or is not visible yet.
    #[error("Not found: {resource}")]
    #[diagnostic(code(launchpad::cloud::not_found))]
    NotFound {
        /// Resource that was looked up
        resource: String,
    },

    /// The caller lacks permission. Never retried.
    #[error("Permission denied: {message}")]
    #[diagnostic(
        code(launchpad::cloud::permission_denied),
        help("Check that the authenticated account has the IAM admin roles on the project")
    )]
    PermissionDenied {
        /// Provider message, verbatim
        message: String,
    },

    /// A create raced with an existing resource.
    #[error("Already exists: {resource}")]
    #[diagnostic(code(launchpad::cloud::already_exists))]
    AlreadyExists {
        /// Resource that was created
        resource: String,
    },

    /// Timeouts, throttling, concurrent modification and similar.
    #[error("Transient cloud error: {message}")]
    #[diagnostic(code(launchpad::cloud::transient))]
    Transient {
        /// Provider message
        message: String,
    },

    /// Anything else.
    #[error("Cloud call failed: {message}")]
    #[diagnostic(code(launchpad::cloud::other))]
    Other {
        /// Provider message
        message: String,
    },
}

impl CloudError {
    /// Create a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create an unclassified error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Not-found counts as retryable because a read right after a create may
    /// not observe it yet.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Transient { .. })
    }
}

/// A deploy identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Account email, the identity's stable id
    pub email: String,
    /// Account id (local part of the email)
    pub account_id: String,
}

/// Lifecycle of a workload identity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolState {
    /// Usable
    Active,
    /// Soft-deleted; its id stays reserved for 30 days
    Deleted,
}

/// A workload identity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPool {
    /// Short pool id
    pub pool_id: String,
    /// Full resource name
    pub name: String,
    /// Lifecycle state
    pub state: PoolState,
}

/// An OIDC provider inside a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProvider {
    /// Short provider id
    pub provider_id: String,
    /// Full resource name, used by workflows to authenticate
    pub name: String,
}

/// A container image repository in Artifact Registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRepository {
    /// Short repository id
    pub repository_id: String,
    /// Full resource name
    pub name: String,
}

/// Configuration of an OIDC identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcProviderSpec {
    /// Token issuer
    pub issuer_uri: String,
    /// Target attribute -> CEL expression over the token
    pub attribute_mapping: BTreeMap<String, String>,
    /// CEL condition a token must satisfy
    pub attribute_condition: String,
}

impl OidcProviderSpec {
    /// Provider trusting tokens issued to workflows of a single repository.
    #[must_use]
    pub fn for_repository(issuer_uri: &str, repository: &str) -> Self {
        let attribute_mapping = [
            ("google.subject", "assertion.sub"),
            ("attribute.actor", "assertion.actor"),
            ("attribute.repository", "assertion.repository"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            issuer_uri: issuer_uri.to_string(),
            attribute_mapping,
            attribute_condition: format!("assertion.repository=='{repository}'"),
        }
    }

    /// Mapping in `key=value,key=value` form.
    #[must_use]
    pub fn mapping_arg(&self) -> String {
        self.attribute_mapping
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Resource an IAM policy is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IamTarget {
    /// The project itself
    Project,
    /// A service account, by email
    ServiceAccount(String),
}

/// One role and its members.
///
/// A binding with a condition only applies while the condition holds; the
/// deploy identity is never added to one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    /// Role name, e.g. `roles/run.admin`
    pub role: String,
    /// Principals holding the role
    #[serde(default)]
    pub members: BTreeSet<String>,
    /// IAM condition, written back verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
    /// Fields this crate does not model, written back verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IamBinding {
    /// Whether the binding applies unconditionally.
    #[must_use]
    pub const fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }
}

/// An IAM policy with its concurrency token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicy {
    /// Role bindings
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
    /// Concurrency token returned by the read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Policy schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Fields this crate does not model, such as `auditConfigs`
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IamPolicy {
    /// Whether `member` holds `role` unconditionally.
    #[must_use]
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.is_unconditional() && b.members.contains(member))
    }

    /// Add `member` to the unconditional binding of `role`, keeping every
    /// existing member and every conditional binding untouched.
    ///
    /// Returns whether the policy changed.
    pub fn add_member(&mut self, role: &str, member: &str) -> bool {
        if let Some(binding) = self
            .bindings
            .iter_mut()
            .find(|b| b.role == role && b.is_unconditional())
        {
            return binding.members.insert(member.to_string());
        }
        self.bindings.push(IamBinding {
            role: role.to_string(),
            members: BTreeSet::from([member.to_string()]),
            ..IamBinding::default()
        });
        true
    }
}

/// Operations the provisioner needs from the cloud identity API.
///
/// `get_*` methods return `Ok(None)` for a resource that does not exist.
/// `create_*` methods only issue the create; callers poll the matching
/// `get_*` until the resource becomes visible.
#[async_trait]
pub trait CloudIdentityProvisioner: Send + Sync {
    /// Enable a service API. Enabling an enabled API succeeds.
    async fn enable_service(&self, project: &str, service: &str) -> Result<(), CloudError>;

    /// Numeric project id, needed for principal set identifiers.
    async fn project_number(&self, project: &str) -> Result<String, CloudError>;

    /// Look up a service account by account id.
    async fn get_service_account(
        &self,
        project: &str,
        account_id: &str,
    ) -> Result<Option<ServiceAccount>, CloudError>;

    /// Create a service account.
    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<(), CloudError>;

    /// List workload identity pools, including soft-deleted ones.
    async fn list_identity_pools(&self, project: &str) -> Result<Vec<IdentityPool>, CloudError>;

    /// Look up a pool by id.
    async fn get_identity_pool(
        &self,
        project: &str,
        pool_id: &str,
    ) -> Result<Option<IdentityPool>, CloudError>;

    /// Create a pool.
    async fn create_identity_pool(
        &self,
        project: &str,
        pool_id: &str,
        display_name: &str,
    ) -> Result<(), CloudError>;

    /// Look up a provider inside a pool.
    async fn get_identity_provider(
        &self,
        project: &str,
        pool_id: &str,
        provider_id: &str,
    ) -> Result<Option<IdentityProvider>, CloudError>;

    /// Create an OIDC provider inside a pool.
    async fn create_identity_provider(
        &self,
        project: &str,
        pool_id: &str,
        provider_id: &str,
        spec: &OidcProviderSpec,
    ) -> Result<(), CloudError>;

    /// Look up a Docker repository in `location`.
    async fn get_artifact_repository(
        &self,
        project: &str,
        location: &str,
        repository_id: &str,
    ) -> Result<Option<ArtifactRepository>, CloudError>;

    /// Create a Docker repository in `location`.
    async fn create_artifact_repository(
        &self,
        project: &str,
        location: &str,
        repository_id: &str,
        description: &str,
    ) -> Result<(), CloudError>;

    /// Read the IAM policy of a target.
    async fn get_iam_policy(&self, project: &str, target: &IamTarget)
    -> Result<IamPolicy, CloudError>;

    /// Write the IAM policy of a target. The policy's etag guards against
    /// concurrent modification; a stale etag is a transient error.
    async fn set_iam_policy(
        &self,
        project: &str,
        target: &IamTarget,
        policy: &IamPolicy,
    ) -> Result<(), CloudError>;
}
