use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::ManageError;

// Searched when PATH is unset
pub const DEFAULT_SEARCH_PATH: &str = "/bin:/usr/bin";

/// Process environment the tool depends on, captured once per invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub path: Option<OsString>,
    pub home: Option<PathBuf>,
}

impl Environment {
    /// Read `PATH` and, if it can be determined, the home directory of the current user
    #[must_use]
    pub fn capture() -> Self {
        let home = directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        if home.is_none() {
            log::debug!("no home directory for the current user");
        }

        Self {
            path: env::var_os("PATH"),
            home,
        }
    }

    #[must_use]
    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    #[must_use]
    pub fn which(&self, name: &str) -> Option<PathBuf> {
        find_executable(name, self.path.as_deref())
    }
}

// Locate an executable the way a shell would, given a PATH value
#[must_use]
pub fn find_executable(name: &str, path: Option<&OsStr>) -> Option<PathBuf> {
    let path = path.unwrap_or_else(|| OsStr::new(DEFAULT_SEARCH_PATH));
    env::split_paths(path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Runs external programs to completion
pub trait CommandRunner {
    /// Run `program` with `args`, blocking until it exits
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be started or exits unsuccessfully.
    fn run(&self, program: &str, args: &[OsString]) -> Result<(), ManageError>;
}

// Human readable form of an invocation, used in logs and errors
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

/// Spawns real processes with inherited stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<(), ManageError> {
        let command = render_command(program, args);
        log::debug!("running: {command}");

        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| ManageError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            log::debug!("finished: {command}");
            Ok(())
        } else {
            Err(ManageError::SubprocessFailure {
                command,
                code: status.code(),
            })
        }
    }
}
