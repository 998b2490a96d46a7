//! Ecosystem selection from dependency manifests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use launchpad_core::ProjectType;

use crate::tree::ProjectTree;

/// File names that mark a dependency manifest for an ecosystem.
#[must_use]
pub fn manifest_names(project_type: ProjectType) -> &'static [&'static str] {
    match project_type {
        ProjectType::Python => &[
            "requirements.txt",
            "pyproject.toml",
            "setup.py",
            "setup.cfg",
            "Pipfile",
        ],
        ProjectType::Node => &["package.json"],
        ProjectType::Java => &["pom.xml", "build.gradle", "build.gradle.kts"],
        ProjectType::Go => &["go.mod"],
        ProjectType::Rust => &["Cargo.toml"],
        ProjectType::Ruby => &["Gemfile"],
        ProjectType::Unknown => &[],
    }
}

fn classify(path: &Path) -> Option<ProjectType> {
    let name = path.file_name()?.to_str()?;
    ProjectType::PRIORITY
        .into_iter()
        .find(|t| manifest_names(*t).contains(&name))
}

/// Result of manifest classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcosystemChoice {
    /// Winning ecosystem
    pub project_type: ProjectType,
    /// Its manifests, sorted
    pub manifests: Vec<PathBuf>,
}

/// Pick the ecosystem with the most manifests; ties go to the higher
/// [`ProjectType::PRIORITY`].
#[must_use]
pub fn choose_ecosystem(tree: &ProjectTree) -> EcosystemChoice {
    let mut by_type: BTreeMap<ProjectType, Vec<PathBuf>> = BTreeMap::new();
    for file in tree.files() {
        if let Some(t) = classify(file) {
            by_type.entry(t).or_default().push(file.clone());
        }
    }

    let winner = by_type
        .iter()
        .max_by(|(a, a_files), (b, b_files)| {
            a_files
                .len()
                .cmp(&b_files.len())
                .then_with(|| b.priority().cmp(&a.priority()))
        })
        .map(|(t, _)| *t);

    match winner {
        Some(project_type) => {
            let mut manifests = by_type.remove(&project_type).unwrap_or_default();
            manifests.sort();
            tracing::debug!(
                project_type = %project_type,
                manifests = manifests.len(),
                candidates = by_type.len() + 1,
                "Selected ecosystem"
            );
            EcosystemChoice {
                project_type,
                manifests,
            }
        }
        None => EcosystemChoice {
            project_type: ProjectType::Unknown,
            manifests: Vec::new(),
        },
    }
}
