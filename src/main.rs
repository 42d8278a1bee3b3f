use anyhow::{Context, Result};
use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::process::exit;

mod cli;

use cli::{execute_command, exit_code, Cli};

// Diagnostics go to stderr so stdout only carries command output
fn init_logger(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto)
        .context("failed to initialize logging")
}

fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Execute the appropriate command
    let result = init_logger(cli.verbose)
        .and_then(|()| execute_command(&cli).context("command execution failed"));

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        exit(exit_code(&err));
    }
}
