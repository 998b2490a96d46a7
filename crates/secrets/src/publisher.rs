//! Idempotent publishing of a [`SecretSet`] to a secret store.

use std::collections::{BTreeMap, BTreeSet};

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::store::{SecretStoreClient, StoreError};
use crate::types::SecretSet;

/// Publishing options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Replace secrets that already exist in the store
    pub force_overwrite: bool,
}

/// Outcome of one publish call.
///
/// `written`, `skipped_existing`, `failed` and `unresolved` are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Names written in this call
    pub written: BTreeSet<String>,
    /// Names left untouched because the store already had them
    pub skipped_existing: BTreeSet<String>,
    /// Names whose write failed, with the store's message
    pub failed: BTreeMap<String, String>,
    /// Required names with no value, never sent to the store
    pub unresolved: BTreeSet<String>,
    /// Names present in the store before this call
    pub stored: BTreeSet<String>,
}

impl PublishReport {
    /// Whether every write succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names the store holds after this call.
    #[must_use]
    pub fn available(&self) -> BTreeSet<String> {
        self.stored.union(&self.written).cloned().collect()
    }
}

/// Fatal publishing errors.
#[derive(Debug, Error, Diagnostic)]
pub enum PublishError {
    /// The store's existing names could not be listed, so nothing was written.
    #[error("Cannot publish secrets: {0}")]
    #[diagnostic(code(launchpad::secrets::publish_failed))]
    Listing(#[source] StoreError),
}

/// Writes resolved secrets without clobbering existing ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretsPublisher;

impl SecretsPublisher {
    /// Create a publisher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Publish every resolved descriptor in `set` to `store`.
    ///
    /// Existing names are listed first and skipped unless
    /// `options.force_overwrite`. A failed write is recorded in
    /// [`PublishReport::failed`] and publishing continues.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Listing`] if existing names cannot be listed.
    #[tracing::instrument(
        name = "publish_secrets",
        skip_all,
        fields(target = %store.target(), secrets = set.len(), force = options.force_overwrite)
    )]
    pub async fn publish(
        &self,
        set: &SecretSet,
        store: &dyn SecretStoreClient,
        options: PublishOptions,
    ) -> Result<PublishReport, PublishError> {
        let stored = store.list().await.map_err(PublishError::Listing)?;
        let mut report = PublishReport {
            stored,
            ..PublishReport::default()
        };

        for descriptor in set.iter() {
            let name = &descriptor.name;
            let Some(value) = descriptor.value() else {
                if descriptor.required {
                    report.unresolved.insert(name.clone());
                }
                continue;
            };

            if report.stored.contains(name) && !options.force_overwrite {
                tracing::debug!(secret = %name, "Secret already stored, skipping");
                report.skipped_existing.insert(name.clone());
                continue;
            }

            match store.write(name, value).await {
                Ok(()) => {
                    tracing::info!(secret = %name, "Secret written");
                    report.written.insert(name.clone());
                }
                Err(err) => {
                    tracing::warn!(secret = %name, error = %err, "Secret write failed");
                    report.failed.insert(name.clone(), err.to_string());
                }
            }
        }

        tracing::info!(
            written = report.written.len(),
            skipped = report.skipped_existing.len(),
            failed = report.failed.len(),
            unresolved = report.unresolved.len(),
            "Secrets published"
        );
        Ok(report)
    }
}
