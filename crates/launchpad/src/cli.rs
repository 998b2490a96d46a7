//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use launchpad_core::DEFAULT_CONFIG_FILE;

use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "launchpad")]
#[command(
    about = "Analyze a project, provision its deploy identity, publish its secrets and generate its CI pipeline"
)]
#[command(long_about = None)]
#[command(version)]
#[allow(missing_docs)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json: bool,

    #[arg(
        short = 'c',
        long,
        global = true,
        help = "Path to the configuration file",
        default_value = DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Commands {
    #[command(about = "Print the requirements inferred from a project tree as JSON")]
    Analyze {
        #[arg(help = "Project root", default_value = ".")]
        path: PathBuf,
    },
    #[command(about = "Create or validate the deploy identity and its trust binding")]
    Provision {
        #[arg(help = "Project root", default_value = ".")]
        path: PathBuf,
    },
    #[command(about = "Write the secrets manifest (names and origins, never values)")]
    Manifest {
        #[arg(help = "Project root", default_value = ".")]
        path: PathBuf,
        #[arg(long, help = "Print the manifest instead of writing it")]
        stdout: bool,
    },
    #[command(about = "Provision, then publish resolved secrets to the repository")]
    Publish {
        #[arg(help = "Project root", default_value = ".")]
        path: PathBuf,
        #[arg(long, help = "Overwrite secrets that already exist")]
        force: bool,
    },
    #[command(about = "Generate the deploy workflow from already published secrets")]
    Generate {
        #[arg(help = "Project root", default_value = ".")]
        path: PathBuf,
        #[arg(long, help = "Print the workflow instead of writing it")]
        stdout: bool,
    },
    #[command(about = "Run every stage and write the workflow and secrets manifest")]
    Run {
        #[arg(help = "Project root", default_value = ".")]
        path: PathBuf,
        #[arg(long, help = "Overwrite secrets that already exist")]
        force: bool,
    },
}

impl Commands {
    /// Subcommand name, for spans.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Analyze { .. } => "analyze",
            Self::Provision { .. } => "provision",
            Self::Manifest { .. } => "manifest",
            Self::Publish { .. } => "publish",
            Self::Generate { .. } => "generate",
            Self::Run { .. } => "run",
        }
    }

    /// Whether the command calls external services.
    #[must_use]
    pub const fn requires_async_runtime(&self) -> bool {
        !matches!(self, Self::Analyze { .. } | Self::Manifest { .. })
    }
}

/// Parse process arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
