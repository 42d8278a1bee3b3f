use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::io;

use minecraft_manage::handlers::{dispatch, Context};
use minecraft_manage::{
    Action, CommandConfig, DockerOptions, Environment, ManageError, MinecraftOptions,
    SystemRunner, SystemdOptions,
};

// CLI arguments parsing structure
#[derive(Parser)]
#[command(author, version, about, long_about = None, disable_help_subcommand = true)]
pub struct Cli {
    /// Log every external command that is run
    #[arg(short = 'v', long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration
    ShowConfig {
        /// Output the configuration in JSON format
        #[arg(short = 'j', long)]
        json: bool,
        #[command(flatten)]
        systemd: SystemdOptions,
        #[command(flatten)]
        minecraft: MinecraftOptions,
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Check if the server is installed to systemd
    SystemdCheckInstalled {
        #[command(flatten)]
        systemd: SystemdOptions,
    },
    /// Install the server to systemd
    SystemdInstall {
        #[command(flatten)]
        systemd: SystemdOptions,
        #[command(flatten)]
        minecraft: MinecraftOptions,
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Build the server image
    BuildImage {
        #[command(flatten)]
        minecraft: MinecraftOptions,
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Create the server container
    CreateContainer {
        #[command(flatten)]
        minecraft: MinecraftOptions,
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Start the server container
    Start {
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Stop the server container
    Stop {
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Remove the server container
    Clear {
        #[command(flatten)]
        docker: DockerOptions,
    },
    /// Trigger a backup of the server world
    Backup {
        #[command(flatten)]
        systemd: SystemdOptions,
    },
}

impl Commands {
    pub fn action(&self) -> Action {
        match self {
            Commands::ShowConfig { .. } => Action::ShowConfig,
            Commands::SystemdCheckInstalled { .. } => Action::SystemdCheckInstalled,
            Commands::SystemdInstall { .. } => Action::SystemdInstall,
            Commands::BuildImage { .. } => Action::BuildImage,
            Commands::CreateContainer { .. } => Action::CreateContainer,
            Commands::Start { .. } => Action::Start,
            Commands::Stop { .. } => Action::Stop,
            Commands::Clear { .. } => Action::Clear,
            Commands::Backup { .. } => Action::Backup,
        }
    }

    // Compose the option groups this subcommand accepts into one configuration
    pub fn config(&self, verbose: bool, env: &Environment) -> CommandConfig {
        let base = CommandConfig::new(self.action(), verbose, env);
        match self {
            Commands::ShowConfig {
                systemd,
                minecraft,
                docker,
                ..
            }
            | Commands::SystemdInstall {
                systemd,
                minecraft,
                docker,
            } => base
                .with_systemd(systemd)
                .with_minecraft(minecraft)
                .with_docker(docker),
            Commands::SystemdCheckInstalled { systemd } | Commands::Backup { systemd } => {
                base.with_systemd(systemd)
            }
            Commands::BuildImage { minecraft, docker }
            | Commands::CreateContainer { minecraft, docker } => {
                base.with_minecraft(minecraft).with_docker(docker)
            }
            Commands::Start { docker } | Commands::Stop { docker } | Commands::Clear { docker } => {
                base.with_docker(docker)
            }
        }
    }

    fn json(&self) -> bool {
        matches!(self, Commands::ShowConfig { json: true, .. })
    }
}

// Execute the selected command
pub fn execute_command(cli: &Cli) -> Result<()> {
    let env = Environment::capture();
    let config = cli.command.config(cli.verbose, &env);
    log::debug!("effective configuration: {config:?}");

    let ctx = Context {
        env: &env,
        runner: &SystemRunner,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();

    dispatch(&config, cli.command.json(), &ctx, &mut out)
        .with_context(|| format!("{} failed", config.action))
}

// Process exit status for a failed run; errors not raised by an action exit with 1
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ManageError>())
        .map_or(1, ManageError::exit_code)
}
