//! Framework detection from manifest contents.

use std::collections::BTreeSet;

use launchpad_core::ProjectType;

/// Framework markers per ecosystem as `(token, framework)`, highest priority
/// first.
#[must_use]
pub fn markers(project_type: ProjectType) -> &'static [(&'static str, &'static str)] {
    match project_type {
        ProjectType::Python => &[
            ("django", "django"),
            ("fastapi", "fastapi"),
            ("flask", "flask"),
            ("starlette", "starlette"),
            ("streamlit", "streamlit"),
        ],
        ProjectType::Node => &[
            ("next", "nextjs"),
            ("@nestjs/core", "nestjs"),
            ("express", "express"),
            ("fastify", "fastify"),
            ("koa", "koa"),
        ],
        ProjectType::Java => &[
            ("spring-boot-starter-web", "spring-boot"),
            ("spring-boot-starter", "spring-boot"),
            ("quarkus-core", "quarkus"),
            ("micronaut-runtime", "micronaut"),
        ],
        ProjectType::Go => &[
            ("github.com/gin-gonic/gin", "gin"),
            ("github.com/labstack/echo/v4", "echo"),
            ("github.com/gofiber/fiber/v2", "fiber"),
            ("github.com/go-chi/chi/v5", "chi"),
        ],
        ProjectType::Rust => &[
            ("axum", "axum"),
            ("actix-web", "actix-web"),
            ("rocket", "rocket"),
            ("warp", "warp"),
        ],
        ProjectType::Ruby => &[("rails", "rails"), ("sinatra", "sinatra")],
        ProjectType::Unknown => &[],
    }
}

/// Split manifest text into lowercase tokens.
///
/// Package names keep `-`, `_`, `@`, `/` and `.`; everything else separates.
/// Version specifiers such as `django>=4.2` therefore yield `django`.
#[must_use]
pub fn tokenize(content: &str) -> BTreeSet<String> {
    content
        .split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '@' | '/' | '.')))
        .map(|t| t.trim_matches('.').to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// First framework whose marker appears among the tokens of any manifest.
#[must_use]
pub fn detect<'a>(
    project_type: ProjectType,
    manifest_contents: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    let tokens: BTreeSet<String> = manifest_contents
        .into_iter()
        .flat_map(tokenize)
        .collect();

    markers(project_type)
        .iter()
        .find(|(token, _)| tokens.contains(*token))
        .map(|(_, framework)| (*framework).to_string())
}
