//! In-memory secret store for tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::{SecretStoreClient, StoreError};
use crate::types::SecretValue;

#[derive(Debug, Default)]
struct StoreState {
    secrets: BTreeMap<String, String>,
    failing_writes: BTreeSet<String>,
    list_error: Option<String>,
    writes: usize,
}

/// In-memory [`SecretStoreClient`] with failure injection.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    state: Mutex<StoreState>,
}

impl InMemorySecretStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a secret.
    pub fn seed(&self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(name.to_string(), value.to_string());
    }

    /// Make every write of `name` fail.
    pub fn fail_writes_for(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .insert(name.to_string());
    }

    /// Make listing fail with `message`.
    pub fn fail_listing(&self, message: &str) {
        self.state.lock().unwrap().list_error = Some(message.to_string());
    }

    /// Stored value, for assertions.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().secrets.get(name).cloned()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

#[async_trait]
impl SecretStoreClient for InMemorySecretStore {
    fn target(&self) -> String {
        "in-memory".to_string()
    }

    async fn list(&self) -> Result<BTreeSet<String>, StoreError> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.list_error {
            return Err(StoreError::ListFailed {
                target: "in-memory".to_string(),
                message: message.clone(),
            });
        }
        Ok(state.secrets.keys().cloned().collect())
    }

    async fn write(&self, name: &str, value: &SecretValue) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_writes.contains(name) {
            return Err(StoreError::WriteFailed {
                name: name.to_string(),
                message: "HTTP 422: rejected".to_string(),
            });
        }
        state
            .secrets
            .insert(name.to_string(), value.expose().to_string());
        state.writes += 1;
        Ok(())
    }
}
