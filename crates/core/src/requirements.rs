//! Project requirements produced by static analysis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Ecosystem a project is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    /// Python (pip, poetry, pipenv)
    Python,
    /// JavaScript / TypeScript
    Node,
    /// JVM (Maven, Gradle)
    Java,
    /// Go modules
    Go,
    /// Cargo
    Rust,
    /// Bundler
    Ruby,
    /// No manifest found
    Unknown,
}

impl ProjectType {
    /// Known ecosystems in tie-break priority order (highest first).
    pub const PRIORITY: [Self; 6] = [
        Self::Python,
        Self::Node,
        Self::Java,
        Self::Go,
        Self::Rust,
        Self::Ruby,
    ];

    /// Position in [`Self::PRIORITY`]; `Unknown` sorts last.
    #[must_use]
    pub fn priority(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| *t == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    /// Lowercase identifier used in logs and serialized output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Node => "node",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Ruby => "ruby",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the project is deployed, inferred from descriptor files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentTarget {
    /// Google Cloud Run
    CloudRun,
    /// AWS Elastic Container Service
    Ecs,
    /// Azure Container Instances
    Aci,
    /// No descriptor found
    Unknown,
}

impl DeploymentTarget {
    /// Kebab-case identifier used in logs and serialized output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CloudRun => "cloud-run",
            Self::Ecs => "ecs",
            Self::Aci => "aci",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool that owns the project's database migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationTool {
    /// SQLAlchemy Alembic
    Alembic,
    /// Django `manage.py migrate`
    Django,
    /// Prisma Migrate
    Prisma,
    /// Knex.js
    Knex,
    /// Flyway
    Flyway,
    /// Liquibase
    Liquibase,
    /// Diesel CLI
    Diesel,
    /// Rails Active Record
    Rails,
    /// A migrations directory with no recognisable tool
    Generic,
}

const GENERIC_MIGRATION_SCRIPT: &str = r#"if [ -f migrations/run_migrations.py ]; then
  python migrations/run_migrations.py
elif [ -x migrations/run.sh ]; then
  ./migrations/run.sh
else
  echo "::error::No migration tool detected; add migrations/run_migrations.py or migrations/run.sh"
  exit 1
fi"#;

impl MigrationTool {
    /// Command that applies pending migrations.
    #[must_use]
    pub const fn apply_command(self) -> &'static str {
        match self {
            Self::Alembic => "alembic upgrade head",
            Self::Django => "python manage.py migrate --noinput",
            Self::Prisma => "npx prisma migrate deploy",
            Self::Knex => "npx knex migrate:latest",
            Self::Flyway => "flyway migrate",
            Self::Liquibase => "liquibase update",
            Self::Diesel => "diesel migration run",
            Self::Rails => "bundle exec rails db:migrate",
            Self::Generic => GENERIC_MIGRATION_SCRIPT,
        }
    }
}

/// Deployment requirements inferred from a project tree.
///
/// Built once per analysis run and never mutated afterwards; downstream
/// components receive it by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRequirements {
    /// Ecosystem with the most manifest files
    pub project_type: ProjectType,

    /// Framework detected from manifest contents
    pub framework: Option<String>,

    /// Manifest files for `project_type`, relative to the root, sorted
    pub dependency_manifest_paths: Vec<PathBuf>,

    /// Environment variable names read by the source code (never values)
    pub detected_env_vars: BTreeSet<String>,

    /// Whether a migrations directory or migration tool config exists
    pub has_database_migrations: bool,

    /// Migration tool, when one could be identified
    pub migration_tool: Option<MigrationTool>,

    /// Whether a Dockerfile exists at the project root
    pub has_dockerfile: bool,

    /// Deployment target inferred from descriptor files
    pub deployment_target: DeploymentTarget,
}

impl ProjectRequirements {
    /// Requirements for a tree in which nothing was recognised.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            project_type: ProjectType::Unknown,
            framework: None,
            dependency_manifest_paths: Vec::new(),
            detected_env_vars: BTreeSet::new(),
            has_database_migrations: false,
            migration_tool: None,
            has_dockerfile: false,
            deployment_target: DeploymentTarget::Unknown,
        }
    }

    /// Whether any ecosystem was recognised.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.project_type != ProjectType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(ProjectType::Python.priority() < ProjectType::Node.priority());
        assert!(ProjectType::Go.priority() < ProjectType::Rust.priority());
        assert_eq!(ProjectType::Unknown.priority(), ProjectType::PRIORITY.len());
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&DeploymentTarget::CloudRun).unwrap();
        assert_eq!(json, "\"cloud-run\"");
        let json = serde_json::to_string(&ProjectType::Python).unwrap();
        assert_eq!(json, "\"python\"");
    }

    #[test]
    fn test_unknown_requirements() {
        let req = ProjectRequirements::unknown();
        assert!(!req.is_known());
        assert!(req.detected_env_vars.is_empty());
        assert_eq!(req.deployment_target, DeploymentTarget::Unknown);
    }

    #[test]
    fn test_generic_migration_fails_loudly_without_a_runner() {
        let script = MigrationTool::Generic.apply_command();
        assert!(script.contains("[ -f migrations/run_migrations.py ]"));
        assert!(script.contains("[ -x migrations/run.sh ]"));
        assert!(script.trim_end().ends_with("fi"));
        assert!(script.contains("exit 1"));
        assert_eq!(MigrationTool::Alembic.apply_command(), "alembic upgrade head");
    }
}
