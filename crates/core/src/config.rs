//! Deployment configuration.
//!
//! [`DeployConfig`] replaces every piece of ambient tool state (active cloud
//! project, authenticated repository, ...) with an explicit value that callers
//! pass into each provisioning and publishing call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "launchpad.toml";

/// Top-level configuration loaded from `launchpad.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Cloud project that owns the deploy identity
    pub project_id: String,

    /// Region services are deployed to
    #[serde(default = "default_region")]
    pub region: String,

    /// Source repository whose workflows may assume the deploy identity
    pub repository: RepositoryRef,

    /// Identity resource naming and role grants
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Backoff settings for eventually consistent calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Source scanning limits
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Generated workflow settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// External command settings
    #[serde(default)]
    pub commands: CommandConfig,

    /// Secret values supplied from outside the engine
    #[serde(default)]
    pub secrets: SecretsConfig,
}

fn default_region() -> String {
    "us-central1".to_string()
}

impl DeployConfig {
    /// Create a configuration with defaults for everything but the identity
    /// of the project and repository.
    #[must_use]
    pub fn new(project_id: impl Into<String>, repository: RepositoryRef) -> Self {
        Self {
            project_id: project_id.into(),
            region: default_region(),
            repository,
            identity: IdentityConfig::default(),
            retry: RetryConfig::default(),
            analysis: AnalysisConfig::default(),
            pipeline: PipelineConfig::default(),
            commands: CommandConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::ConfigParse { message, .. } => Error::ConfigParse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::ConfigParse {
            path: PathBuf::from("<inline>"),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(Error::invalid_config("project_id", "must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(Error::invalid_config("region", "must not be empty"));
        }
        if self.identity.service_account_id.len() < 6 || self.identity.service_account_id.len() > 30
        {
            return Err(Error::invalid_config(
                "identity.service_account_id",
                "must be between 6 and 30 characters",
            ));
        }
        if self.identity.pool_prefix.is_empty() {
            return Err(Error::invalid_config(
                "identity.pool_prefix",
                "must not be empty",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_config(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::invalid_config(
                "retry.multiplier",
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::invalid_config(
                "retry.jitter",
                "must be within [0, 1]",
            ));
        }
        if self.analysis.max_files == 0 {
            return Err(Error::invalid_config(
                "analysis.max_files",
                "must be at least 1",
            ));
        }
        if self.commands.timeout_secs == 0 {
            return Err(Error::invalid_config(
                "commands.timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Email of the deploy identity.
    #[must_use]
    pub fn service_account_email(&self) -> String {
        format!(
            "{}@{}.iam.gserviceaccount.com",
            self.identity.service_account_id, self.project_id
        )
    }
}

/// A source-control repository in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryRef {
    owner: String,
    name: String,
}

impl RepositoryRef {
    /// Parse `owner/name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] unless the input has exactly two
    /// non-empty segments.
    pub fn parse(slug: &str) -> Result<Self> {
        let mut parts = slug.trim().split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(Self {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(Error::invalid_config(
                "repository",
                format!("expected 'owner/name', got '{slug}'"),
            )),
        }
    }

    /// Repository owner (user or organisation).
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl TryFrom<String> for RepositoryRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RepositoryRef> for String {
    fn from(value: RepositoryRef) -> Self {
        value.to_string()
    }
}

/// Naming of identity resources and roles granted to the deploy identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Account id of the deploy service account (the part before `@`)
    pub service_account_id: String,
    /// Prefix of workload identity pool ids; a creation token is appended
    pub pool_prefix: String,
    /// Id of the OIDC provider inside the pool
    pub provider_id: String,
    /// Token issuer trusted by the provider
    pub issuer_uri: String,
    /// Project roles granted to the deploy identity; empty selects defaults
    pub roles: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            service_account_id: "gha-deployer".to_string(),
            pool_prefix: "github-actions-pool".to_string(),
            provider_id: "github-actions-provider".to_string(),
            issuer_uri: "https://token.actions.githubusercontent.com".to_string(),
            roles: Vec::new(),
        }
    }
}

/// Backoff settings for calls against eventually consistent APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Randomisation factor applied to each delay, within [0, 1]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay_ms: 500,
            max_delay_ms: 16_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Bounds on source scanning during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Maximum number of source files scanned for env var access
    pub max_files: usize,
    /// Files larger than this are not scanned
    pub max_file_bytes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_files: 2_000,
            max_file_bytes: 256 * 1024,
        }
    }
}

/// Settings for the generated workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Workflow display name
    pub workflow_name: String,
    /// Branch whose pushes trigger a deployment
    pub branch: String,
    /// Runner label
    pub runner: String,
    /// Name of the deployed service
    pub service_name: String,
    /// Workflow output path, relative to the project root
    pub output: PathBuf,
    /// Secrets manifest output path, relative to the project root
    pub manifest_output: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workflow_name: "Deploy".to_string(),
            branch: "main".to_string(),
            runner: "ubuntu-latest".to_string(),
            service_name: "app".to_string(),
            output: PathBuf::from(".github/workflows/deploy.yml"),
            manifest_output: PathBuf::from("launchpad-secrets.yaml"),
        }
    }
}

/// Settings for external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
    /// Cloud CLI binary
    pub gcloud: String,
    /// Source-control CLI binary
    pub gh: String,
}

impl CommandConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            gcloud: "gcloud".to_string(),
            gh: "gh".to_string(),
        }
    }
}

/// Externally supplied secret values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Secret name -> where its value comes from
    pub supplied: BTreeMap<String, SuppliedSecret>,
}

/// Source of a supplied secret value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuppliedSecret {
    /// Environment variable holding the value at invocation time
    pub env: String,
}
