//! Pipeline steps and the ordered spec the generator produces.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::condition::Condition;

/// What a step does when the workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Invoke a published action, e.g. `actions/checkout@v4`
    Uses(String),
    /// Run a shell script
    Run(String),
}

/// `${{ secrets.NAME }}` expression for a secret.
#[must_use]
pub fn secret_expression(name: &str) -> String {
    format!("${{{{ secrets.{name} }}}}")
}

/// One step of a deploy pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStep {
    /// Unique step name, used as the workflow step id
    pub name: String,
    /// Display name
    pub title: String,
    /// Names of steps that must run first
    pub depends_on: BTreeSet<String>,
    /// Names of secrets the step reads
    pub secret_refs: BTreeSet<String>,
    /// Guard deciding whether the step is selected
    pub condition: Condition,
    /// Action or script
    pub action: StepAction,
    /// Action inputs, in insertion order
    pub with_inputs: IndexMap<String, String>,
    /// Step environment, in insertion order
    pub env: IndexMap<String, String>,
}

impl PipelineStep {
    fn new(name: &str, title: &str, action: StepAction) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            depends_on: BTreeSet::new(),
            secret_refs: BTreeSet::new(),
            condition: Condition::Always,
            action,
            with_inputs: IndexMap::new(),
            env: IndexMap::new(),
        }
    }

    /// Step that uses an action.
    #[must_use]
    pub fn uses(name: &str, title: &str, action: impl Into<String>) -> Self {
        Self::new(name, title, StepAction::Uses(action.into()))
    }

    /// Step that runs a script.
    #[must_use]
    pub fn run(name: &str, title: &str, script: impl Into<String>) -> Self {
        Self::new(name, title, StepAction::Run(script.into()))
    }

    /// Add dependencies.
    #[must_use]
    pub fn after(mut self, steps: &[&str]) -> Self {
        self.depends_on.extend(steps.iter().map(ToString::to_string));
        self
    }

    /// Set the guard.
    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Add a plain action input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_inputs.insert(key.into(), value.into());
        self
    }

    /// Add an action input bound to a secret.
    #[must_use]
    pub fn with_secret_input(mut self, key: impl Into<String>, secret: &str) -> Self {
        self.secret_refs.insert(secret.to_string());
        self.with_inputs.insert(key.into(), secret_expression(secret));
        self
    }

    /// Add a plain environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Expose secrets as same-named environment variables.
    #[must_use]
    pub fn with_secret_env<'a>(mut self, secrets: impl IntoIterator<Item = &'a str>) -> Self {
        for secret in secrets {
            self.secret_refs.insert(secret.to_string());
            self.env
                .insert(secret.to_string(), secret_expression(secret));
        }
        self
    }

    /// Record secrets referenced from free-form inputs.
    #[must_use]
    pub fn with_secret_refs<'a>(mut self, secrets: impl IntoIterator<Item = &'a str>) -> Self {
        self.secret_refs
            .extend(secrets.into_iter().map(ToString::to_string));
        self
    }
}

/// Selected steps in execution order.
///
/// Every step appears after all of its dependencies and every `secret_refs`
/// entry is a resolved secret name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSpec {
    /// Steps in topological order
    pub steps: Vec<PipelineStep>,
}

impl PipelineSpec {
    /// Step names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Every secret referenced by any step.
    #[must_use]
    pub fn secret_refs(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|s| s.secret_refs.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_expression() {
        assert_eq!(secret_expression("API_KEY"), "${{ secrets.API_KEY }}");
    }

    #[test]
    fn test_builder_tracks_secret_refs() {
        let step = PipelineStep::uses("auth", "Authenticate", "google-github-actions/auth@v2")
            .after(&["checkout"])
            .with_secret_input("workload_identity_provider", "WIF_PROVIDER")
            .with_secret_env(["API_KEY"])
            .with_env("MODE", "production");

        assert_eq!(
            step.secret_refs,
            BTreeSet::from(["API_KEY".to_string(), "WIF_PROVIDER".to_string()])
        );
        assert_eq!(
            step.with_inputs.get("workload_identity_provider").map(String::as_str),
            Some("${{ secrets.WIF_PROVIDER }}")
        );
        assert_eq!(
            step.env.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["API_KEY", "MODE"]
        );
    }
}
