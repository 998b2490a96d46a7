//! Static project analysis for launchpad.
//!
//! [`ProjectAnalyzer::analyze`] walks a project tree and infers the facts the
//! rest of the engine needs to provision, resolve secrets and generate a
//! pipeline. Analysis never touches the network, never writes, and always
//! produces a value: unreadable files are logged and skipped, and a tree with
//! no recognisable manifest degrades to [`ProjectType::Unknown`].
//!
//! Two runs over an unchanged tree produce equal [`ProjectRequirements`].

pub mod env_scan;
pub mod framework;
pub mod manifest;
pub mod migrations;
pub mod target;
mod tree;

use std::path::Path;

use launchpad_core::{AnalysisConfig, ProjectRequirements, ProjectType};

pub use tree::{ProjectTree, SKIPPED_DIRS};

/// Infers [`ProjectRequirements`] from a project tree.
#[derive(Debug, Clone, Default)]
pub struct ProjectAnalyzer {
    limits: AnalysisConfig,
}

impl ProjectAnalyzer {
    /// Create an analyzer with the given scanning limits.
    #[must_use]
    pub fn new(limits: AnalysisConfig) -> Self {
        Self { limits }
    }

    /// Analyze the tree rooted at `root`.
    #[must_use]
    pub fn analyze(&self, root: &Path) -> ProjectRequirements {
        let span = tracing::info_span!("analyze", root = %root.display());
        let _guard = span.enter();

        let tree = ProjectTree::scan(root);
        let choice = manifest::choose_ecosystem(&tree);
        let max_bytes = self.limits.max_file_bytes;

        let framework = if choice.project_type == ProjectType::Unknown {
            None
        } else {
            let contents: Vec<String> = choice
                .manifests
                .iter()
                .filter_map(|m| tree.read_bounded(m, max_bytes))
                .collect();
            framework::detect(choice.project_type, contents.iter().map(String::as_str))
        };

        let detected_env_vars = env_scan::detect(&tree, self.limits.max_files, max_bytes);
        let (has_database_migrations, migration_tool) =
            migrations::detect(&tree, framework.as_deref());
        let deployment_target = target::detect(&tree, max_bytes);

        let requirements = ProjectRequirements {
            project_type: choice.project_type,
            framework,
            dependency_manifest_paths: choice.manifests,
            detected_env_vars,
            has_database_migrations,
            migration_tool,
            has_dockerfile: tree.has_file("Dockerfile"),
            deployment_target,
        };

        tracing::info!(
            project_type = %requirements.project_type,
            framework = requirements.framework.as_deref().unwrap_or("none"),
            env_vars = requirements.detected_env_vars.len(),
            migrations = requirements.has_database_migrations,
            target = %requirements.deployment_target,
            "Project analysis complete"
        );
        requirements
    }
}
