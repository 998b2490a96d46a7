//! Deployment target inference from descriptor files at the project root.

use std::path::Path;

use launchpad_core::DeploymentTarget;

use crate::tree::ProjectTree;

const KNATIVE_API: &str = "serving.knative.dev";

/// Infer the target; precedence is cloud-run, then ecs, then aci.
#[must_use]
pub fn detect(tree: &ProjectTree, max_file_bytes: u64) -> DeploymentTarget {
    if is_cloud_run(tree, max_file_bytes) {
        DeploymentTarget::CloudRun
    } else if tree.has_file("task-definition.json")
        || tree.has_file("ecs-params.yml")
        || tree.has_dir("copilot")
    {
        DeploymentTarget::Ecs
    } else if tree.has_file("aci.yaml") || tree.has_file("container-group.yaml") {
        DeploymentTarget::Aci
    } else {
        DeploymentTarget::Unknown
    }
}

fn is_cloud_run(tree: &ProjectTree, max_file_bytes: u64) -> bool {
    if tree.has_file("cloudrun.yaml") || tree.has_file("cloudbuild.yaml") {
        return true;
    }
    ["service.yaml", "service.yml"].iter().any(|name| {
        tree.has_file(name)
            && tree
                .read_bounded(Path::new(name), max_file_bytes)
                .is_some_and(|content| content.contains(KNATIVE_API))
    })
}
