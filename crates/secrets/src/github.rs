//! [`SecretStoreClient`] backed by the `gh` CLI.
//!
//! Every call names the repository explicitly with `--repo`. Values are
//! written to the child's stdin and never appear in its arguments.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use launchpad_core::RepositoryRef;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::store::{SecretStoreClient, StoreError};
use crate::types::SecretValue;

/// GitHub Actions repository secrets through `gh secret`.
#[derive(Debug, Clone)]
pub struct GhCliStore {
    binary: String,
    repository: RepositoryRef,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ListedSecret {
    name: String,
}

impl GhCliStore {
    /// Create a store for `repository`, invoking `binary` with a per-call
    /// `timeout`.
    #[must_use]
    pub fn new(binary: impl Into<String>, repository: RepositoryRef, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            repository,
            timeout,
        }
    }

    fn timeout_error(&self, operation: &str) -> StoreError {
        StoreError::Timeout {
            operation: operation.to_string(),
            seconds: self.timeout.as_secs(),
        }
    }
}

/// Parse `gh secret list --json name` output.
fn parse_listing(stdout: &str) -> Result<BTreeSet<String>, serde_json::Error> {
    let listed: Vec<ListedSecret> = serde_json::from_str(stdout)?;
    Ok(listed.into_iter().map(|s| s.name).collect())
}

#[async_trait]
impl SecretStoreClient for GhCliStore {
    fn target(&self) -> String {
        self.repository.to_string()
    }

    async fn list(&self) -> Result<BTreeSet<String>, StoreError> {
        let repo = self.repository.to_string();
        tracing::debug!(repository = %repo, "Listing repository secrets");

        let mut command = Command::new(&self.binary);
        command
            .args(["secret", "list", "--repo", repo.as_str(), "--json", "name"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| self.timeout_error("secret list"))?
            .map_err(|e| StoreError::ListFailed {
                target: repo.clone(),
                message: format!("Failed to execute {}: {e}", self.binary),
            })?;

        if !output.status.success() {
            return Err(StoreError::ListFailed {
                target: repo,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_listing(&String::from_utf8_lossy(&output.stdout)).map_err(|e| {
            StoreError::ListFailed {
                target: repo,
                message: format!("Unexpected gh output: {e}"),
            }
        })
    }

    async fn write(&self, name: &str, value: &SecretValue) -> Result<(), StoreError> {
        let repo = self.repository.to_string();
        tracing::debug!(repository = %repo, secret = name, "Writing repository secret");

        let write_failed = |message: String| StoreError::WriteFailed {
            name: name.to_string(),
            message,
        };

        let mut child = Command::new(&self.binary)
            .args(["secret", "set", name, "--repo", repo.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| write_failed(format!("Failed to execute {}: {e}", self.binary)))?;

        let run = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(value.expose().as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| self.timeout_error("secret set"))?
            .map_err(|e| write_failed(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(write_failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let names = parse_listing(
            r#"[{"name":"GCP_PROJECT_ID"},{"name":"API_KEY"},{"name":"API_KEY"}]"#,
        )
        .unwrap();
        assert_eq!(
            names,
            BTreeSet::from(["API_KEY".to_string(), "GCP_PROJECT_ID".to_string()])
        );
        assert!(parse_listing("[]").unwrap().is_empty());
        assert!(parse_listing("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_listing() {
        let store = GhCliStore::new(
            "launchpad-no-such-gh",
            RepositoryRef::parse("acme/shop").unwrap(),
            Duration::from_secs(5),
        );
        assert_eq!(store.target(), "acme/shop");
        let err = store.list().await.unwrap_err();
        assert!(matches!(err, StoreError::ListFailed { .. }));

        let err = store
            .write("API_KEY", &SecretValue::new("s3cr3t-value"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed { .. }));
        assert!(!err.to_string().contains("s3cr3t-value"));
    }
}
