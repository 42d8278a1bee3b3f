use clap::{Args, ValueEnum};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod handlers;
pub mod system;

pub use system::{find_executable, CommandRunner, Environment, SystemRunner};

// Constants
pub const SYSTEMD_UNIT: &str = "my-minecraft";
pub const SYSTEMD_BACKUP_UNIT: &str = "my-minecraft-backup";
pub const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";
pub const USER_UNIT_DIR: &str = ".config/systemd/user";
pub const DEFAULT_SYSTEMD_INSTANCE: &str = "default";
pub const DEFAULT_MINECRAFT_VERSION: &str = "1.20.1";
pub const DEFAULT_IMAGE_TAG: &str = "noupload.local/my-minecraft";
pub const FALLBACK_DOCKER: &str = "docker";

// Container engines probed on PATH, in preference order
const DOCKER_CANDIDATES: [&str; 2] = ["docker", "podman"];

/// Errors raised while running an action
#[derive(Debug, Error)]
pub enum ManageError {
    #[error("{tool} not found; {hint}")]
    ToolMissing { tool: String, hint: String },

    #[error("command '{command}' returned non-zero exit status {}", display_code(.code))]
    SubprocessFailure { command: String, code: Option<i32> },

    #[error("failed to run '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("action '{0}' is not implemented yet")]
    UnsupportedAction(Action),

    #[error("could not determine the home directory of the current user")]
    HomeNotFound,

    #[error("failed to write output")]
    Output(#[from] io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown (terminated by signal)".to_string(), |c| c.to_string())
}

impl ManageError {
    // Every failure is terminal for the invocation
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// The subcommand selected on the command line
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ShowConfig,
    SystemdCheckInstalled,
    SystemdInstall,
    BuildImage,
    CreateContainer,
    Start,
    Stop,
    Clear,
    Backup,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::ShowConfig,
        Action::SystemdCheckInstalled,
        Action::SystemdInstall,
        Action::BuildImage,
        Action::CreateContainer,
        Action::Start,
        Action::Stop,
        Action::Clear,
        Action::Backup,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::ShowConfig => "show-config",
            Action::SystemdCheckInstalled => "systemd-check-installed",
            Action::SystemdInstall => "systemd-install",
            Action::BuildImage => "build-image",
            Action::CreateContainer => "create-container",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Clear => "clear",
            Action::Backup => "backup",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which systemd manager the units belong to
#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SystemdMode {
    System,
    #[default]
    User,
}

impl fmt::Display for SystemdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemdMode::System => f.write_str("system"),
            SystemdMode::User => f.write_str("user"),
        }
    }
}

/// Options shared by every action that touches systemd
#[derive(Args, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SystemdOptions {
    /// Whether to use systemd for a user, or for the whole system
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = SystemdMode::User)]
    pub mode: SystemdMode,

    /// Name of the systemd unit instance to work with; e.g. 'default' means my-minecraft@default.service
    #[arg(short = 'i', long = "instance", value_name = "NAME", default_value = DEFAULT_SYSTEMD_INSTANCE)]
    pub instance: String,
}

impl Default for SystemdOptions {
    fn default() -> Self {
        Self {
            mode: SystemdMode::default(),
            instance: DEFAULT_SYSTEMD_INSTANCE.to_string(),
        }
    }
}

/// Paths of the three template unit files, in verification order
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UnitFiles {
    pub service: PathBuf,
    pub backup_service: PathBuf,
    pub backup_timer: PathBuf,
}

impl UnitFiles {
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [&self.service, &self.backup_service, &self.backup_timer]
            .into_iter()
            .map(PathBuf::as_path)
    }
}

impl SystemdOptions {
    /// Directory holding the unit files for the selected manager
    ///
    /// # Errors
    ///
    /// Returns `ManageError::HomeNotFound` in user mode when `home` is unknown.
    pub fn unit_dir(&self, home: Option<&Path>) -> Result<PathBuf, ManageError> {
        match self.mode {
            SystemdMode::System => Ok(PathBuf::from(SYSTEM_UNIT_DIR)),
            SystemdMode::User => home
                .map(|home| home.join(USER_UNIT_DIR))
                .ok_or(ManageError::HomeNotFound),
        }
    }

    /// # Errors
    ///
    /// Same as [`SystemdOptions::unit_dir`].
    pub fn unit_files(&self, home: Option<&Path>) -> Result<UnitFiles, ManageError> {
        let dir = self.unit_dir(home)?;
        Ok(UnitFiles {
            service: dir.join(format!("{SYSTEMD_UNIT}@.service")),
            backup_service: dir.join(format!("{SYSTEMD_BACKUP_UNIT}@.service")),
            backup_timer: dir.join(format!("{SYSTEMD_BACKUP_UNIT}@.timer")),
        })
    }

    #[must_use]
    pub fn service_unit(&self) -> String {
        format!("{SYSTEMD_UNIT}@{}.service", self.instance)
    }

    #[must_use]
    pub fn backup_timer_unit(&self) -> String {
        format!("{SYSTEMD_BACKUP_UNIT}@{}.timer", self.instance)
    }
}

/// Options for actions that build or run a server
#[derive(Args, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MinecraftOptions {
    /// Which Minecraft version to build the server for
    #[arg(long = "minecraft-version", value_name = "VERSION", default_value = DEFAULT_MINECRAFT_VERSION)]
    pub minecraft_version: String,
}

impl Default for MinecraftOptions {
    fn default() -> Self {
        Self {
            minecraft_version: DEFAULT_MINECRAFT_VERSION.to_string(),
        }
    }
}

/// Options for actions that talk to the container engine
#[derive(Args, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DockerOptions {
    /// Container engine executable [default: docker or podman found on PATH]
    #[arg(long = "docker-exec", value_name = "PATH")]
    pub docker_exec: Option<String>,

    /// Tag of the server image
    #[arg(long = "image-tag", value_name = "TAG", default_value = DEFAULT_IMAGE_TAG)]
    pub image_tag: String,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            docker_exec: None,
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }
}

/// First container engine found on `path`, falling back to plain "docker"
#[must_use]
pub fn detect_docker_exec(path: Option<&std::ffi::OsStr>) -> String {
    DOCKER_CANDIDATES
        .iter()
        .find_map(|name| find_executable(name, path))
        .map_or_else(
            || FALLBACK_DOCKER.to_string(),
            |found| found.to_string_lossy().into_owned(),
        )
}

/// Effective configuration of one invocation
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub action: Action,
    pub verbose: bool,
    pub systemd: SystemdOptions,
    pub minecraft_version: String,
    pub docker_exec: String,
    pub image_tag: String,
}

impl CommandConfig {
    /// Start from the defaults; the container engine is resolved against `env` here, once
    #[must_use]
    pub fn new(action: Action, verbose: bool, env: &Environment) -> Self {
        Self {
            action,
            verbose,
            systemd: SystemdOptions::default(),
            minecraft_version: DEFAULT_MINECRAFT_VERSION.to_string(),
            docker_exec: detect_docker_exec(env.path.as_deref()),
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
        }
    }

    #[must_use]
    pub fn with_systemd(mut self, systemd: &SystemdOptions) -> Self {
        self.systemd = systemd.clone();
        self
    }

    #[must_use]
    pub fn with_minecraft(mut self, minecraft: &MinecraftOptions) -> Self {
        self.minecraft_version = minecraft.minecraft_version.clone();
        self
    }

    #[must_use]
    pub fn with_docker(mut self, docker: &DockerOptions) -> Self {
        if let Some(exec) = &docker.docker_exec {
            self.docker_exec = exec.clone();
        }
        self.image_tag = docker.image_tag.clone();
        self
    }
}
