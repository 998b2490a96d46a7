//! End-to-end analysis over temporary project trees.

use std::fs;
use std::path::{Path, PathBuf};

use launchpad_analyzer::ProjectAnalyzer;
use launchpad_core::{AnalysisConfig, DeploymentTarget, MigrationTool, ProjectType};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn python_service() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "requirements.txt", "fastapi==0.110\nuvicorn\nalembic\n");
    write(
        root,
        "app/main.py",
        "import os\nDB = os.environ['DATABASE_URL']\nKEY = os.getenv('API_KEY')\nPORT = os.getenv('PORT')\n",
    );
    write(root, "migrations/env.py", "");
    write(root, "Dockerfile", "FROM python:3.12-slim\n");
    write(
        root,
        "service.yaml",
        "apiVersion: serving.knative.dev/v1\nkind: Service\n",
    );
    dir
}

#[test]
fn python_service_with_migrations() {
    let dir = python_service();
    let req = ProjectAnalyzer::default().analyze(dir.path());

    assert_eq!(req.project_type, ProjectType::Python);
    assert_eq!(req.framework.as_deref(), Some("fastapi"));
    assert_eq!(req.dependency_manifest_paths, vec![PathBuf::from("requirements.txt")]);
    assert!(req.has_database_migrations);
    assert_eq!(req.migration_tool, Some(MigrationTool::Generic));
    assert!(req.has_dockerfile);
    assert_eq!(req.deployment_target, DeploymentTarget::CloudRun);

    let vars: Vec<_> = req.detected_env_vars.iter().map(String::as_str).collect();
    assert_eq!(vars, vec!["API_KEY", "DATABASE_URL"]);
}

#[test]
fn repeated_analysis_is_identical() {
    let dir = python_service();
    let analyzer = ProjectAnalyzer::default();
    let first = serde_json::to_vec(&analyzer.analyze(dir.path())).unwrap();
    let second = serde_json::to_vec(&analyzer.analyze(dir.path())).unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_tree_is_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let req = ProjectAnalyzer::default().analyze(dir.path());
    assert!(!req.is_known());
    assert!(req.framework.is_none());
    assert!(req.detected_env_vars.is_empty());
    assert_eq!(req.deployment_target, DeploymentTarget::Unknown);
}

#[test]
fn env_template_and_vendored_sources() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "package.json", r#"{"dependencies": {"express": "^4"}}"#);
    write(root, "src/server.js", "const s = process.env.SESSION_SECRET;\n");
    write(root, ".env.example", "STRIPE_KEY=sk_test_placeholder\nGITHUB_TOKEN=\n");
    write(
        root,
        "node_modules/lib/index.js",
        "process.env.SHOULD_NOT_APPEAR\n",
    );

    let req = ProjectAnalyzer::default().analyze(root);
    assert_eq!(req.project_type, ProjectType::Node);
    assert_eq!(req.framework.as_deref(), Some("express"));
    let vars: Vec<_> = req.detected_env_vars.iter().map(String::as_str).collect();
    assert_eq!(vars, vec!["SESSION_SECRET", "STRIPE_KEY"]);
}

#[test]
fn scan_limits_are_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "go.mod", "module example.com/svc\n");
    write(root, "a.go", "os.Getenv(\"FIRST\")\n");
    write(root, "b.go", "os.Getenv(\"SECOND\")\n");
    write(root, "c.go", &format!("os.Getenv(\"THIRD\")\n{}", "/".repeat(4096)));

    let limits = AnalysisConfig {
        max_files: 2,
        max_file_bytes: 1024,
    };
    let req = ProjectAnalyzer::new(limits).analyze(root);
    let vars: Vec<_> = req.detected_env_vars.iter().map(String::as_str).collect();
    assert_eq!(vars, vec!["FIRST", "SECOND"]);
}

#[test]
fn single_python_manifest_with_migrations_dir() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "requirements.txt", "psycopg2\n");
    fs::create_dir_all(dir.path().join("migrations")).unwrap();

    let req = ProjectAnalyzer::default().analyze(dir.path());
    assert_eq!(req.project_type, ProjectType::Python);
    assert!(req.has_database_migrations);
    assert_eq!(req.deployment_target, DeploymentTarget::Unknown);
}
