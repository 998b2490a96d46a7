//! Publisher behaviour against the in-memory store.

use std::collections::BTreeSet;

use launchpad_core::{InfrastructureResource, ProjectRequirements, ResourceKind};
use launchpad_secrets::testing::InMemorySecretStore;
use launchpad_secrets::{
    PublishError, PublishOptions, ResolverContext, SecretDescriptor, SecretOrigin, SecretSet,
    SecretValue, SecretsPublisher, SecretsResolver,
};

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(ToString::to_string).collect()
}

fn resolved_set() -> SecretSet {
    let mut req = ProjectRequirements::unknown();
    req.detected_env_vars = names(&["API_KEY", "DATABASE_URL"]);
    let resources = vec![
        InfrastructureResource::existing(
            ResourceKind::ServiceAccount,
            "gha-deployer",
            "gha-deployer@demo.iam.gserviceaccount.com",
        ),
        InfrastructureResource::existing(
            ResourceKind::IdentityProvider,
            "github-actions-provider",
            "projects/1/locations/global/workloadIdentityPools/p/providers/github-actions-provider",
        ),
    ];
    let context = ResolverContext::new("demo", "us-central1")
        .with_supplied("DATABASE_URL", SecretValue::new("postgres://db"));
    SecretsResolver::new().resolve(&req, &resources, &context)
}

#[tokio::test]
async fn publish_writes_resolved_and_reports_unresolved() {
    let store = InMemorySecretStore::new();
    let report = SecretsPublisher::new()
        .publish(&resolved_set(), &store, PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.written,
        names(&[
            "DATABASE_URL",
            "DEPLOY_SA_EMAIL",
            "GCP_PROJECT_ID",
            "GCP_REGION",
            "WIF_PROVIDER",
        ])
    );
    assert_eq!(report.unresolved, names(&["API_KEY"]));
    assert!(report.skipped_existing.is_empty());
    assert!(report.is_complete());
    assert_eq!(store.value("DATABASE_URL").as_deref(), Some("postgres://db"));
    assert_eq!(store.value("API_KEY"), None);
}

#[tokio::test]
async fn republish_writes_nothing() {
    let store = InMemorySecretStore::new();
    let publisher = SecretsPublisher::new();
    let set = resolved_set();

    let first = publisher
        .publish(&set, &store, PublishOptions::default())
        .await
        .unwrap();
    let writes = store.writes();
    let second = publisher
        .publish(&set, &store, PublishOptions::default())
        .await
        .unwrap();

    assert!(second.written.is_empty());
    assert_eq!(second.skipped_existing, first.written);
    assert_eq!(store.writes(), writes);
    assert_eq!(second.available(), first.available());
}

#[tokio::test]
async fn existing_secret_is_not_overwritten_without_force() {
    let store = InMemorySecretStore::new();
    store.seed("DATABASE_URL", "postgres://old");

    let report = SecretsPublisher::new()
        .publish(&resolved_set(), &store, PublishOptions::default())
        .await
        .unwrap();
    assert!(report.skipped_existing.contains("DATABASE_URL"));
    assert_eq!(store.value("DATABASE_URL").as_deref(), Some("postgres://old"));

    let report = SecretsPublisher::new()
        .publish(
            &resolved_set(),
            &store,
            PublishOptions {
                force_overwrite: true,
            },
        )
        .await
        .unwrap();
    assert!(report.written.contains("DATABASE_URL"));
    assert_eq!(store.value("DATABASE_URL").as_deref(), Some("postgres://db"));
}

#[tokio::test]
async fn failed_write_is_partial_success() {
    let store = InMemorySecretStore::new();
    store.fail_writes_for("GCP_REGION");

    let report = SecretsPublisher::new()
        .publish(&resolved_set(), &store, PublishOptions::default())
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert!(report.failed.contains_key("GCP_REGION"));
    assert!(!report.written.contains("GCP_REGION"));
    assert!(report.written.contains("GCP_PROJECT_ID"));
}

#[tokio::test]
async fn listing_failure_is_fatal() {
    let store = InMemorySecretStore::new();
    store.fail_listing("HTTP 401: Bad credentials");

    let err = SecretsPublisher::new()
        .publish(&resolved_set(), &store, PublishOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::Listing(_)));
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn optional_descriptor_without_value_is_not_unresolved() {
    let mut set = SecretSet::new();
    let mut optional = SecretDescriptor::unresolved("SENTRY_DSN", SecretOrigin::UserSupplied);
    optional.required = false;
    set.insert(optional);

    let store = InMemorySecretStore::new();
    let report = SecretsPublisher::new()
        .publish(&set, &store, PublishOptions::default())
        .await
        .unwrap();

    assert!(report.unresolved.is_empty());
    assert!(report.written.is_empty());
}
