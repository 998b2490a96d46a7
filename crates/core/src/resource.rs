//! Cloud identity resources and their lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Kind of identity resource managed by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Deploy identity
    ServiceAccount,
    /// Workload identity pool
    IdentityPool,
    /// OIDC provider inside the pool
    IdentityProvider,
    /// Trust binding between the pool principal set and the service account
    IamBinding,
    /// Container image repository the pipeline pushes to
    ArtifactRepository,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ServiceAccount => "service-account",
            Self::IdentityPool => "identity-pool",
            Self::IdentityProvider => "identity-provider",
            Self::IamBinding => "iam-binding",
            Self::ArtifactRepository => "artifact-repository",
        })
    }
}

/// Lifecycle state of a resource.
///
/// ```text
/// ABSENT -> CREATING -> EXISTS -> BOUND
///              |
///              +-> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    /// Not present remotely
    Absent,
    /// Present and visible
    Exists,
    /// Create issued, not yet visible
    Creating,
    /// Trust binding attached and propagated
    Bound,
    /// Provisioning gave up on this resource
    Failed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absent => "ABSENT",
            Self::Exists => "EXISTS",
            Self::Creating => "CREATING",
            Self::Bound => "BOUND",
            Self::Failed => "FAILED",
        })
    }
}

/// A cloud resource tracked through one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureResource {
    /// Resource kind
    pub kind: ResourceKind,
    /// Name chosen by launchpad (account id, pool id, ...)
    pub logical_name: String,
    /// Provider-assigned identifier, known once the resource exists
    pub remote_id: Option<String>,
    state: ResourceState,
}

impl InfrastructureResource {
    /// A resource that has not been found remotely.
    #[must_use]
    pub fn absent(kind: ResourceKind, logical_name: impl Into<String>) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            remote_id: None,
            state: ResourceState::Absent,
        }
    }

    /// A resource discovered by an existence check.
    #[must_use]
    pub fn existing(
        kind: ResourceKind,
        logical_name: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            remote_id: Some(remote_id.into()),
            state: ResourceState::Exists,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ResourceState {
        self.state
    }

    /// Whether the resource is present remotely (EXISTS or BOUND).
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self.state, ResourceState::Exists | ResourceState::Bound)
    }

    /// ABSENT -> CREATING
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from any other state.
    pub fn mark_creating(&mut self) -> Result<()> {
        self.transition(ResourceState::Creating, &[ResourceState::Absent])
    }

    /// CREATING -> EXISTS, recording the provider id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from any other state.
    pub fn mark_exists(&mut self, remote_id: impl Into<String>) -> Result<()> {
        self.transition(ResourceState::Exists, &[ResourceState::Creating])?;
        self.remote_id = Some(remote_id.into());
        Ok(())
    }

    /// EXISTS -> BOUND
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from any other state.
    pub fn mark_bound(&mut self) -> Result<()> {
        self.transition(ResourceState::Bound, &[ResourceState::Exists])
    }

    /// Any non-terminal state -> FAILED
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when already BOUND or FAILED.
    pub fn mark_failed(&mut self) -> Result<()> {
        self.transition(
            ResourceState::Failed,
            &[
                ResourceState::Absent,
                ResourceState::Creating,
                ResourceState::Exists,
            ],
        )
    }

    fn transition(&mut self, to: ResourceState, allowed_from: &[ResourceState]) -> Result<()> {
        if !allowed_from.contains(&self.state) {
            return Err(Error::InvalidTransition {
                kind: self.kind,
                logical_name: self.logical_name.clone(),
                from: self.state,
                to,
            });
        }
        tracing::trace!(
            kind = %self.kind,
            name = %self.logical_name,
            from = %self.state,
            to = %to,
            "Resource state transition"
        );
        self.state = to;
        Ok(())
    }
}
