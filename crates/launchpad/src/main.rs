//! launchpad command-line entry point.

// The binary owns stdout and stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

use launchpad::cli::{self, Cli};
use launchpad::commands;
use launchpad::errors::{CliError, EXIT_OK, EXIT_RUN, exit_code_for};
use launchpad::logging::{LoggingConfig, init_logging};

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    if let Err(e) = init_logging(&LoggingConfig::from_flags(cli.level, cli.json)) {
        eprintln!("{e:?}");
    }

    let outcome = if cli.command.requires_async_runtime() {
        match run_with_tokio(&cli) {
            Some(outcome) => outcome,
            None => std::process::exit(EXIT_RUN),
        }
    } else {
        commands::execute_sync(&cli.command, &cli.config)
    };

    std::process::exit(report(outcome));
}

/// Create a tokio runtime and run the async command path.
fn run_with_tokio(cli: &Cli) -> Option<Result<String, CliError>> {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            return None;
        }
    };
    Some(rt.block_on(commands::execute(&cli.command, &cli.config)))
}

/// Print command output or the error report; returns the exit code.
fn report(outcome: Result<String, CliError>) -> i32 {
    match outcome {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            EXIT_OK
        }
        Err(error) => {
            let converged = error.converged_summary();
            if !converged.is_empty() {
                eprintln!("Converged before the failure:");
                for line in &converged {
                    eprintln!("  {line}");
                }
            }
            let code = exit_code_for(&error);
            eprintln!("{:?}", miette::Report::new(error));
            code
        }
    }
}
