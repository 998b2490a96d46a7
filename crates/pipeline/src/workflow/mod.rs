//! GitHub Actions workflow rendering.

mod emitter;
pub mod schema;

pub use emitter::{GitHubActionsEmitter, HEADER, referenced_secrets};
