//! Secret resolution and publishing for launchpad.
//!
//! [`SecretsResolver`] merges the env var names found by analysis, values the
//! operator supplied and identifiers produced by provisioning into a
//! [`SecretSet`]. [`SecretsPublisher`] writes the resolved part of that set to
//! a [`SecretStoreClient`] without overwriting existing entries unless asked.
//!
//! Values are held in [`SecretValue`] and never logged or serialized.

pub mod github;
pub mod publisher;
pub mod resolver;
pub mod store;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use github::GhCliStore;
pub use publisher::{PublishError, PublishOptions, PublishReport, SecretsPublisher};
pub use resolver::{
    DEPLOY_SA_EMAIL, GCP_PROJECT_ID, GCP_REGION, INFRASTRUCTURE_SECRETS, ResolverContext,
    SecretsResolver, WIF_PROVIDER,
};
pub use store::{SecretStoreClient, StoreError};
pub use types::{SecretDescriptor, SecretOrigin, SecretSet, SecretValue};
