//! Command execution.
//!
//! Every command returns the text to print on stdout; the binary decides
//! how to print it and how to report errors.

use std::path::{Path, PathBuf};

use launchpad_analyzer::ProjectAnalyzer;
use launchpad_core::{AnalysisConfig, DeployConfig};
use tracing::Instrument;

use crate::cli::Commands;
use crate::errors::CliError;
use crate::orchestrator::{Orchestrator, RunOptions, RunReport};

/// Load configuration from `path`.
///
/// # Errors
///
/// Returns [`CliError::Config`] if the file is missing or invalid.
pub fn load_config(path: &Path) -> Result<DeployConfig, CliError> {
    Ok(DeployConfig::load(path)?)
}

/// Run a command that needs no async runtime.
///
/// # Errors
///
/// Returns the command's error.
pub fn execute_sync(command: &Commands, config_path: &Path) -> Result<String, CliError> {
    let _span = crate::command_span!(command.name()).entered();
    match command {
        Commands::Analyze { path } => analyze(path, config_path),
        Commands::Manifest { path, stdout } => {
            let orchestrator = Orchestrator::from_config(load_config(config_path)?);
            manifest(&orchestrator, path, *stdout)
        }
        Commands::Provision { .. }
        | Commands::Publish { .. }
        | Commands::Generate { .. }
        | Commands::Run { .. } => Err(CliError::RuntimeRequired {
            command: command.name(),
        }),
    }
}

/// Run a command against the real cloud and secret store.
///
/// # Errors
///
/// Returns the command's error.
pub async fn execute(command: &Commands, config_path: &Path) -> Result<String, CliError> {
    let orchestrator = Orchestrator::from_config(load_config(config_path)?);
    execute_with(&orchestrator, command)
        .instrument(crate::command_span!(command.name()))
        .await
}

/// Run a command against the orchestrator's collaborators.
///
/// # Errors
///
/// Returns the command's error; failed runs carry what converged.
pub async fn execute_with(
    orchestrator: &Orchestrator,
    command: &Commands,
) -> Result<String, CliError> {
    match command {
        Commands::Analyze { path } => render_requirements(&orchestrator.analyze(path)),
        Commands::Manifest { path, stdout } => manifest(orchestrator, path, *stdout),
        Commands::Provision { path } => {
            let report = orchestrator.provision(path).await?;
            Ok(report.summary().join("\n"))
        }
        Commands::Publish { path, force } => {
            let report = orchestrator
                .publish(
                    path,
                    RunOptions {
                        force_overwrite: *force,
                    },
                )
                .await?;
            Ok(report.summary().join("\n"))
        }
        Commands::Generate { path, stdout } => {
            let report = orchestrator.generate(path).await?;
            let workflow = report.workflow.as_deref().unwrap_or_default();
            if *stdout {
                return Ok(workflow.to_string());
            }
            let written = write_artifact(path, &orchestrator.config().pipeline.output, workflow)?;
            Ok(format!("Wrote {}", written.display()))
        }
        Commands::Run { path, force } => {
            let report = orchestrator
                .run(
                    path,
                    RunOptions {
                        force_overwrite: *force,
                    },
                )
                .await?;
            let mut lines = report.summary();
            lines.extend(write_run_artifacts(orchestrator, path, &report)?);
            Ok(lines.join("\n"))
        }
    }
}

fn manifest(orchestrator: &Orchestrator, path: &Path, stdout: bool) -> Result<String, CliError> {
    let report = orchestrator.manifest(path)?;
    let manifest = report.secrets_manifest.as_deref().unwrap_or_default();
    if stdout {
        return Ok(manifest.to_string());
    }
    let written = write_artifact(
        path,
        &orchestrator.config().pipeline.manifest_output,
        manifest,
    )?;
    Ok(format!("Wrote {}", written.display()))
}

/// Analyze `path`, using the limits from `config_path` when that file
/// exists.
///
/// # Errors
///
/// Returns an error if an existing configuration file is invalid.
pub fn analyze(path: &Path, config_path: &Path) -> Result<String, CliError> {
    let limits = if config_path.is_file() {
        load_config(config_path)?.analysis
    } else {
        tracing::debug!(config = %config_path.display(), "No configuration file, using default limits");
        AnalysisConfig::default()
    };
    render_requirements(&ProjectAnalyzer::new(limits).analyze(path))
}

fn render_requirements(
    requirements: &launchpad_core::ProjectRequirements,
) -> Result<String, CliError> {
    serde_json::to_string_pretty(requirements).map_err(|source| CliError::Serialize {
        what: "project requirements",
        source,
    })
}

fn write_run_artifacts(
    orchestrator: &Orchestrator,
    root: &Path,
    report: &RunReport,
) -> Result<Vec<String>, CliError> {
    let pipeline = &orchestrator.config().pipeline;
    let mut written = Vec::new();
    if let Some(manifest) = &report.secrets_manifest {
        let path = write_artifact(root, &pipeline.manifest_output, manifest)?;
        written.push(format!("Wrote {}", path.display()));
    }
    if let Some(workflow) = &report.workflow {
        let path = write_artifact(root, &pipeline.output, workflow)?;
        written.push(format!("Wrote {}", path.display()));
    }
    Ok(written)
}

/// Write `contents` to `root/relative`, creating parent directories.
///
/// # Errors
///
/// Returns [`CliError::FileError`] naming the path that failed.
pub fn write_artifact(root: &Path, relative: &Path, contents: &str) -> Result<PathBuf, CliError> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::file_error("create directory", parent, e))?;
    }
    std::fs::write(&path, contents).map_err(|e| CliError::file_error("write", &path, e))?;
    tracing::info!(path = %path.display(), bytes = contents.len(), "Artifact written");
    Ok(path)
}
