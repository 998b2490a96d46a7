//! Database migration detection.

use launchpad_core::MigrationTool;

use crate::tree::ProjectTree;

/// Directory suffixes that conventionally hold migrations.
const MIGRATION_DIRS: &[&str] = &[
    "migrations",
    "db/migrate",
    "alembic",
    "prisma/migrations",
    "db/migration",
];

/// Migration tool configuration files at the project root.
const TOOL_CONFIGS: &[&str] = &[
    "alembic.ini",
    "flyway.conf",
    "liquibase.properties",
    "diesel.toml",
    "knexfile.js",
    "knexfile.ts",
];

/// Whether the tree carries migrations, and which tool applies them.
#[must_use]
pub fn detect(tree: &ProjectTree, framework: Option<&str>) -> (bool, Option<MigrationTool>) {
    let has_dir = MIGRATION_DIRS.iter().any(|d| tree.has_dir_ending_with(d));
    let has_config = TOOL_CONFIGS.iter().any(|f| tree.has_file(f));
    if !has_dir && !has_config {
        return (false, None);
    }

    let tool = classify(tree, framework);
    tracing::debug!(tool = ?tool, "Database migrations detected");
    (true, Some(tool))
}

fn classify(tree: &ProjectTree, framework: Option<&str>) -> MigrationTool {
    if tree.has_file("alembic.ini") || tree.has_dir("alembic") {
        MigrationTool::Alembic
    } else if framework == Some("django") || tree.has_file("manage.py") {
        MigrationTool::Django
    } else if tree.has_dir_ending_with("prisma/migrations") {
        MigrationTool::Prisma
    } else if tree.has_file("knexfile.js") || tree.has_file("knexfile.ts") {
        MigrationTool::Knex
    } else if tree.has_file("flyway.conf") || tree.has_dir_ending_with("db/migration") {
        MigrationTool::Flyway
    } else if tree.has_file("liquibase.properties") {
        MigrationTool::Liquibase
    } else if tree.has_file("diesel.toml") {
        MigrationTool::Diesel
    } else if tree.has_dir("db/migrate") && tree.has_file("Gemfile") {
        MigrationTool::Rails
    } else {
        MigrationTool::Generic
    }
}
