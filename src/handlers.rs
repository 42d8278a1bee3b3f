use serde::Serialize;
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use crate::system::{CommandRunner, Environment};
use crate::{Action, CommandConfig, ManageError, SystemdOptions, UnitFiles};

const SYSTEMCTL: &str = "systemctl";
const SYSTEMD_ANALYZE: &str = "systemd-analyze";
const UNKNOWN_PATH: &str = "(unknown: no home directory)";

/// What a handler gets to work with besides its own configuration
pub struct Context<'a> {
    pub env: &'a Environment,
    pub runner: &'a dyn CommandRunner,
}

/// A single action, executed once
pub trait Handler {
    /// Run the action, writing user-facing output to `out`
    ///
    /// # Errors
    ///
    /// Returns the first failure; no step is retried.
    fn run(&self, ctx: &Context<'_>, out: &mut dyn Write) -> Result<(), ManageError>;
}

/// Map the configured action to its handler
///
/// # Errors
///
/// Returns `ManageError::UnsupportedAction` for actions without a handler.
pub fn resolve(config: &CommandConfig, json: bool) -> Result<Box<dyn Handler>, ManageError> {
    match config.action {
        Action::ShowConfig => Ok(Box::new(ShowConfig::new(config, json))),
        Action::SystemdCheckInstalled => Ok(Box::new(SystemdCheckInstalled::new(config))),
        action @ (Action::SystemdInstall
        | Action::BuildImage
        | Action::CreateContainer
        | Action::Start
        | Action::Stop
        | Action::Clear
        | Action::Backup) => Err(ManageError::UnsupportedAction(action)),
    }
}

/// Resolve and run the handler for `config`
///
/// # Errors
///
/// Returns an error if the action is unsupported or its handler fails.
pub fn dispatch(
    config: &CommandConfig,
    json: bool,
    ctx: &Context<'_>,
    out: &mut dyn Write,
) -> Result<(), ManageError> {
    log::debug!("dispatching action {}", config.action);
    resolve(config, json)?.run(ctx, out)
}

// Effective configuration plus the values derived from it
#[derive(Serialize, Debug)]
struct ConfigReport<'a> {
    #[serde(flatten)]
    config: &'a CommandConfig,
    systemd_dir: Option<PathBuf>,
    systemd_unit_files: Option<UnitFiles>,
    systemd_service_unit: String,
    systemd_backup_timer_unit: String,
}

/// Prints the effective configuration
pub struct ShowConfig {
    config: CommandConfig,
    json: bool,
}

impl ShowConfig {
    #[must_use]
    pub fn new(config: &CommandConfig, json: bool) -> Self {
        Self {
            config: config.clone(),
            json,
        }
    }

    fn report(&self, env: &Environment) -> ConfigReport<'_> {
        let systemd = &self.config.systemd;
        ConfigReport {
            config: &self.config,
            systemd_dir: systemd.unit_dir(env.home()).ok(),
            systemd_unit_files: systemd.unit_files(env.home()).ok(),
            systemd_service_unit: systemd.service_unit(),
            systemd_backup_timer_unit: systemd.backup_timer_unit(),
        }
    }
}

impl Handler for ShowConfig {
    fn run(&self, ctx: &Context<'_>, out: &mut dyn Write) -> Result<(), ManageError> {
        let report = self.report(ctx.env);

        if self.json {
            let json = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
            writeln!(out, "{json}")?;
            return Ok(());
        }

        let config = report.config;
        let files = report.systemd_unit_files.as_ref();
        let path_or_unknown = |path: Option<&PathBuf>| {
            path.map_or_else(|| UNKNOWN_PATH.to_string(), |p| p.display().to_string())
        };
        let rows: [(&str, String); 13] = [
            ("action", config.action.to_string()),
            ("verbose", config.verbose.to_string()),
            ("systemd_mode", config.systemd.mode.to_string()),
            ("systemd_instance", config.systemd.instance.clone()),
            ("systemd_dir", path_or_unknown(report.systemd_dir.as_ref())),
            ("systemd_service_file", path_or_unknown(files.map(|f| &f.service))),
            ("systemd_backup_file", path_or_unknown(files.map(|f| &f.backup_service))),
            ("systemd_backup_timer_file", path_or_unknown(files.map(|f| &f.backup_timer))),
            ("systemd_service_unit", report.systemd_service_unit.clone()),
            ("systemd_backup_timer_unit", report.systemd_backup_timer_unit.clone()),
            ("minecraft_version", config.minecraft_version.clone()),
            ("docker_exec", config.docker_exec.clone()),
            ("image_tag", config.image_tag.clone()),
        ];

        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in &rows {
            writeln!(out, "{:<width$}  {value}", format!("{key}:"), width = width + 1)?;
        }
        Ok(())
    }
}

/// Checks that systemd is present and the unit files pass `systemd-analyze verify`
pub struct SystemdCheckInstalled {
    systemd: SystemdOptions,
}

impl SystemdCheckInstalled {
    #[must_use]
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            systemd: config.systemd.clone(),
        }
    }
}

impl Handler for SystemdCheckInstalled {
    fn run(&self, ctx: &Context<'_>, out: &mut dyn Write) -> Result<(), ManageError> {
        if ctx.env.which(SYSTEMCTL).is_none() {
            return Err(ManageError::ToolMissing {
                tool: SYSTEMCTL.to_string(),
                hint: "is systemd even installed?".to_string(),
            });
        }

        let files = self.systemd.unit_files(ctx.env.home())?;
        for file in files.iter() {
            log::info!("verifying {}", file.display());
            let args = [OsString::from("verify"), file.as_os_str().to_os_string()];
            ctx.runner.run(SYSTEMD_ANALYZE, &args)?;
        }

        writeln!(out, "OK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SystemdMode, DEFAULT_IMAGE_TAG};
    use std::cell::RefCell;

    struct NeverRun;

    impl CommandRunner for NeverRun {
        fn run(&self, program: &str, _args: &[OsString]) -> Result<(), ManageError> {
            panic!("{program} should not have been run");
        }
    }

    fn test_env() -> Environment {
        Environment {
            path: Some(OsString::new()),
            home: Some(PathBuf::from("/home/steve")),
        }
    }

    #[test]
    fn unimplemented_actions_fail_loudly() {
        let env = test_env();
        for action in Action::ALL {
            let config = CommandConfig::new(action, false, &env);
            let resolved = resolve(&config, false);
            match action {
                Action::ShowConfig | Action::SystemdCheckInstalled => assert!(resolved.is_ok()),
                _ => match resolved {
                    Err(ManageError::UnsupportedAction(a)) => assert_eq!(a, action),
                    _ => panic!("{action} should be unsupported"),
                },
            }
        }
    }

    #[test]
    fn unsupported_action_message_names_action() {
        let err = ManageError::UnsupportedAction(Action::BuildImage);
        assert_eq!(err.to_string(), "action 'build-image' is not implemented yet");
    }

    #[test]
    fn show_config_prints_defaults() {
        let env = test_env();
        let config = CommandConfig::new(Action::ShowConfig, false, &env);
        let ctx = Context {
            env: &env,
            runner: &NeverRun,
        };

        let mut out = Vec::new();
        dispatch(&config, false, &ctx, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("systemd_mode:"));
        assert!(text.lines().any(|l| l.starts_with("systemd_mode:") && l.ends_with(" user")));
        assert!(text.lines().any(|l| l.ends_with(" 1.20.1")));
        assert!(text.lines().any(|l| l.ends_with(" docker")));
        assert!(text.contains(DEFAULT_IMAGE_TAG));
        assert!(text.contains("/home/steve/.config/systemd/user/my-minecraft@.service"));
        assert!(text.contains("my-minecraft@default.service"));
    }

    #[test]
    fn show_config_json() {
        let env = test_env();
        let systemd = SystemdOptions {
            mode: SystemdMode::System,
            instance: "foo".to_string(),
        };
        let config = CommandConfig::new(Action::ShowConfig, true, &env).with_systemd(&systemd);
        let ctx = Context {
            env: &env,
            runner: &NeverRun,
        };

        let mut out = Vec::new();
        dispatch(&config, true, &ctx, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["action"], "show-config");
        assert_eq!(value["verbose"], true);
        assert_eq!(value["systemd"]["mode"], "system");
        assert_eq!(value["systemd"]["instance"], "foo");
        assert_eq!(value["systemd_dir"], "/etc/systemd/system");
        assert_eq!(
            value["systemd_unit_files"]["backup_timer"],
            "/etc/systemd/system/my-minecraft-backup@.timer"
        );
        assert_eq!(value["systemd_service_unit"], "my-minecraft@foo.service");
        assert_eq!(value["image_tag"], DEFAULT_IMAGE_TAG);
    }

    #[test]
    fn show_config_without_home_still_succeeds() {
        let env = Environment {
            path: Some(OsString::new()),
            home: None,
        };
        let config = CommandConfig::new(Action::ShowConfig, false, &env);
        let ctx = Context {
            env: &env,
            runner: &NeverRun,
        };

        let mut out = Vec::new();
        dispatch(&config, false, &ctx, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text
            .lines()
            .any(|l| l.starts_with("systemd_service_file:") && l.ends_with(UNKNOWN_PATH)));
        assert!(text.contains("my-minecraft@default.service"));

        let mut out = Vec::new();
        dispatch(&config, true, &ctx, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert!(value["systemd_dir"].is_null());
        assert!(value["systemd_unit_files"].is_null());
    }

    #[test]
    fn check_installed_short_circuits_without_systemctl() {
        let env = test_env();
        let config = CommandConfig::new(Action::SystemdCheckInstalled, false, &env);
        let ctx = Context {
            env: &env,
            runner: &NeverRun,
        };

        let mut out = Vec::new();
        let err = dispatch(&config, false, &ctx, &mut out).unwrap_err();
        assert_eq!(
            err.to_string(),
            "systemctl not found; is systemd even installed?"
        );
        assert!(out.is_empty());
    }

    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl CommandRunner for Recorder {
        fn run(&self, program: &str, args: &[OsString]) -> Result<(), ManageError> {
            self.calls
                .borrow_mut()
                .push(crate::system::render_command(program, args));
            Ok(())
        }
    }

    #[cfg(unix)]
    #[test]
    fn check_installed_verifies_in_order() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::TempDir::new().unwrap();
        let systemctl = bin.path().join("systemctl");
        std::fs::write(&systemctl, "").unwrap();
        std::fs::set_permissions(&systemctl, std::fs::Permissions::from_mode(0o755)).unwrap();

        let env = Environment {
            path: Some(bin.path().as_os_str().to_os_string()),
            home: Some(PathBuf::from("/home/steve")),
        };
        let config = CommandConfig::new(Action::SystemdCheckInstalled, false, &env);
        let runner = Recorder {
            calls: RefCell::new(Vec::new()),
        };
        let ctx = Context {
            env: &env,
            runner: &runner,
        };

        let mut out = Vec::new();
        dispatch(&config, false, &ctx, &mut out).unwrap();

        assert_eq!(out, b"OK\n");
        let dir = "/home/steve/.config/systemd/user";
        assert_eq!(
            *runner.calls.borrow(),
            vec![
                format!("systemd-analyze verify {dir}/my-minecraft@.service"),
                format!("systemd-analyze verify {dir}/my-minecraft-backup@.service"),
                format!("systemd-analyze verify {dir}/my-minecraft-backup@.timer"),
            ]
        );
    }
}
