//! Environment variable name detection.
//!
//! Only names are recorded. Env templates are parsed for the left-hand side
//! of each assignment and their values are discarded.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::tree::ProjectTree;

/// Env templates that list variable names next to placeholder values.
pub const ENV_TEMPLATES: &[&str] = &[".env.example", ".env.sample", ".env.template"];

/// Variables supplied by the CI runner or the container platform.
const PLATFORM_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "PORT",
    "PWD",
    "USER",
    "SHELL",
    "LANG",
    "TZ",
    "HOSTNAME",
    "TMPDIR",
    "NODE_ENV",
    "PYTHONPATH",
    "K_SERVICE",
    "K_REVISION",
    "K_CONFIGURATION",
];

const PLATFORM_PREFIXES: &[&str] = &["GITHUB_", "RUNNER_", "CI_"];

const NAME: &str = "([A-Z][A-Z0-9_]*)";

struct LanguagePatterns {
    extensions: &'static [&'static str],
    patterns: Vec<Regex>,
}

fn compile(templates: &[&str]) -> Vec<Regex> {
    templates
        .iter()
        .filter_map(|t| Regex::new(&t.replace("{NAME}", NAME)).ok())
        .collect()
}

static LANGUAGES: LazyLock<Vec<LanguagePatterns>> = LazyLock::new(|| {
    vec![
        LanguagePatterns {
            extensions: &["py"],
            patterns: compile(&[
                r#"os\.environ\[\s*['"]{NAME}['"]\s*\]"#,
                r#"os\.environ\.get\(\s*['"]{NAME}['"]"#,
                r#"os\.getenv\(\s*['"]{NAME}['"]"#,
            ]),
        },
        LanguagePatterns {
            extensions: &["js", "jsx", "mjs", "cjs", "ts", "tsx"],
            patterns: compile(&[
                r"process\.env\.{NAME}\b",
                r#"process\.env\[\s*['"`]{NAME}['"`]\s*\]"#,
            ]),
        },
        LanguagePatterns {
            extensions: &["go"],
            patterns: compile(&[r#"os\.(?:Getenv|LookupEnv)\(\s*"{NAME}"\s*\)"#]),
        },
        LanguagePatterns {
            extensions: &["java", "kt"],
            patterns: compile(&[r#"System\.getenv\(\s*"{NAME}"\s*\)"#]),
        },
        LanguagePatterns {
            extensions: &["rs"],
            patterns: compile(&[r#"env::var(?:_os)?\(\s*"{NAME}"\s*\)"#]),
        },
        LanguagePatterns {
            extensions: &["rb"],
            patterns: compile(&[
                r#"ENV\[\s*['"]{NAME}['"]\s*\]"#,
                r#"ENV\.fetch\(\s*['"]{NAME}['"]"#,
            ]),
        },
    ]
});

static TEMPLATE_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=").ok()
});

/// Whether the runtime or CI platform supplies this variable.
#[must_use]
pub fn is_platform_provided(name: &str) -> bool {
    PLATFORM_VARS.contains(&name) || PLATFORM_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn patterns_for(path: &Path) -> Option<&'static [Regex]> {
    let ext = path.extension()?.to_str()?;
    LANGUAGES
        .iter()
        .find(|lang| lang.extensions.contains(&ext))
        .map(|lang| lang.patterns.as_slice())
}

/// Names read by source code in `content`, using the patterns for `path`.
#[must_use]
pub fn scan_source(path: &Path, content: &str) -> BTreeSet<String> {
    let Some(patterns) = patterns_for(path) else {
        return BTreeSet::new();
    };
    patterns
        .iter()
        .flat_map(|re| re.captures_iter(content))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Names declared in an env template.
#[must_use]
pub fn scan_template(content: &str) -> BTreeSet<String> {
    let Some(re) = TEMPLATE_LINE.as_ref() else {
        return BTreeSet::new();
    };
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_ascii_uppercase()))
        .collect()
}

/// Scan the tree for environment variable names, bounded by `max_files`
/// source files of at most `max_file_bytes` each.
#[must_use]
pub fn detect(tree: &ProjectTree, max_files: usize, max_file_bytes: u64) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut scanned = 0usize;

    for file in tree.files() {
        let is_template = file
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| ENV_TEMPLATES.contains(&n));

        if is_template {
            if let Some(content) = tree.read_bounded(file, max_file_bytes) {
                names.extend(scan_template(&content));
            }
            continue;
        }

        if patterns_for(file).is_none() {
            continue;
        }
        if scanned >= max_files {
            tracing::debug!(max_files, "Source scan limit reached");
            break;
        }
        scanned += 1;
        if let Some(content) = tree.read_bounded(file, max_file_bytes) {
            names.extend(scan_source(file, &content));
        }
    }

    names.retain(|n| !is_platform_provided(n));
    tracing::debug!(scanned, detected = names.len(), "Environment variable scan complete");
    names
}
