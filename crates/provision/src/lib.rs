//! Deploy identity provisioning for launchpad.
//!
//! [`InfrastructureProvisioner`] converges a service account, a workload
//! identity pool, an OIDC provider trusting one repository's workflow tokens,
//! and the binding that lets that provider impersonate the service account.
//! Cloud Run targets also get the Docker repository their images are pushed
//! to. No long-lived key is ever created.
//!
//! The cloud is reached through the [`CloudIdentityProvisioner`] trait; the
//! production implementation is [`GcloudCli`]. Calls against eventually
//! consistent reads go through [`retry::retry_with_backoff`] with an
//! injectable [`Sleeper`].

pub mod client;
mod error;
pub mod gcloud;
pub mod provisioner;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{
    ArtifactRepository, CloudError, CloudIdentityProvisioner, IamBinding, IamPolicy, IamTarget, IdentityPool,
    IdentityProvider, OidcProviderSpec, PoolState, ServiceAccount,
};
pub use error::{ProvisionError, ProvisionFailure, Result};
pub use gcloud::GcloudCli;
pub use provisioner::{InfrastructureProvisioner, WORKLOAD_IDENTITY_USER};
pub use retry::{RetryError, RetryPolicy, Sleeper, TokioSleeper};
