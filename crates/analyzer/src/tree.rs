//! Deterministic inventory of a project tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

/// Directories never descended into: vendored dependencies, build output and
/// interpreter caches.
pub const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".tox",
    ".next",
];

/// Files and directories of a project, relative to its root, in walk order.
#[derive(Debug, Clone, Default)]
pub struct ProjectTree {
    root: PathBuf,
    files: Vec<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl ProjectTree {
    /// Walk `root`, honouring `.gitignore` files inside the tree.
    ///
    /// Entries are visited sorted by file name so two walks over the same tree
    /// produce the same inventory. Unreadable entries are logged and skipped.
    pub fn scan(root: &Path) -> Self {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .parents(false)
            .git_global(false)
            .require_git(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && entry.depth() > 0 && is_skipped(entry.file_name()))
            })
            .build();

        let mut tree = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping unreadable entry during project scan");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            match entry.file_type() {
                Some(t) if t.is_dir() => {
                    tree.dirs.insert(relative.to_path_buf());
                }
                Some(t) if t.is_file() => tree.files.push(relative.to_path_buf()),
                _ => {}
            }
        }

        tracing::debug!(
            root = %root.display(),
            files = tree.files.len(),
            dirs = tree.dirs.len(),
            "Project scan complete"
        );
        tree
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative file paths in walk order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Whether a file exists at `relative`.
    #[must_use]
    pub fn has_file(&self, relative: &str) -> bool {
        let wanted = Path::new(relative);
        self.files.iter().any(|f| f == wanted)
    }

    /// Whether a directory exists at `relative`.
    #[must_use]
    pub fn has_dir(&self, relative: &str) -> bool {
        self.dirs.contains(Path::new(relative))
    }

    /// Whether any directory's path ends with the components of `suffix`.
    #[must_use]
    pub fn has_dir_ending_with(&self, suffix: &str) -> bool {
        let suffix = Path::new(suffix);
        self.dirs.iter().any(|d| d.ends_with(suffix))
    }

    /// Read a file as text if it is no larger than `max_bytes`.
    ///
    /// Oversized files yield `None` silently; IO failures are logged.
    #[must_use]
    pub fn read_bounded(&self, relative: &Path, max_bytes: u64) -> Option<String> {
        let path = self.root.join(relative);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > max_bytes => {
                tracing::trace!(path = %relative.display(), size = meta.len(), "Skipping oversized file");
                return None;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(path = %relative.display(), error = %err, "Failed to stat file");
                return None;
            }
        }
        match std::fs::read(&path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                tracing::warn!(path = %relative.display(), error = %err, "Failed to read file");
                None
            }
        }
    }
}

fn is_skipped(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| SKIPPED_DIRS.contains(&n))
}
