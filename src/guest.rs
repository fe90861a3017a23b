//! Remote command execution on the build server.
//!
//! Steps reach the guest through the [`Communicator`] trait. The default
//! implementation shells out to the system `ssh` binary through a
//! [`CommandRunner`], so tests can capture the argument vector instead of
//! spawning processes.

use std::ffi::OsString;
use std::net::IpAddr;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Errors raised while running commands on the guest.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GuestError {
    /// Raised when the local transport process cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error message.
        message: String,
    },
    /// Raised when a remote command exits unsuccessfully.
    #[error("command `{command}` exited with status {}: {stderr}", display_code(*.code))]
    NonZeroExit {
        /// Command executed on the guest.
        command: String,
        /// Exit code, `None` when the process was terminated by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}

/// Captured output of a finished process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the process exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns `self` when the command succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::NonZeroExit`] naming `command` otherwise.
    pub fn into_success(self, command: &str) -> Result<Self, GuestError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(GuestError::NonZeroExit {
                command: command.to_owned(),
                code: self.code,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }
}

/// Runs local processes.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, GuestError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, GuestError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| GuestError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Channel for executing commands on the build server.
pub trait Communicator: Send + Sync {
    /// Runs `command` on the guest and returns its output regardless of the
    /// exit status.
    ///
    /// # Errors
    ///
    /// Returns [`GuestError`] when the command cannot be delivered.
    fn execute(&self, command: &str) -> Result<CommandOutput, GuestError>;
}

/// Connection settings for [`SshCommunicator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// SSH client binary.
    pub ssh_bin: String,
    /// Remote login user.
    pub user: String,
    /// Remote SSH port.
    pub port: u16,
    /// Private key passed with `-i`. A leading `~/` is expanded.
    pub identity_file: Option<String>,
    /// Disables interactive prompts.
    pub batch_mode: bool,
    /// Enforces host key verification. Build servers are fresh on every run,
    /// so this is off by default.
    pub strict_host_key_checking: bool,
    /// Known-hosts file used by the client.
    pub known_hosts_file: String,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            user: String::from("root"),
            port: 22,
            identity_file: None,
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
        }
    }
}

impl SshSettings {
    fn common_options(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(self.port.to_string())];

        if let Some(identity_file) = &self.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        args
    }
}

/// [`Communicator`] that runs commands through the system SSH client.
#[derive(Clone, Debug)]
pub struct SshCommunicator<R> {
    runner: R,
    settings: SshSettings,
    host: IpAddr,
}

impl<R: CommandRunner> SshCommunicator<R> {
    /// Creates a communicator for `host`.
    #[must_use]
    pub const fn new(runner: R, settings: SshSettings, host: IpAddr) -> Self {
        Self {
            runner,
            settings,
            host,
        }
    }

    /// Returns the address commands are sent to.
    #[must_use]
    pub const fn host(&self) -> IpAddr {
        self.host
    }

    fn command_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.settings.common_options();
        args.push(OsString::from(format!("{}@{}", self.settings.user, self.host)));
        args.push(OsString::from("--"));
        args.push(OsString::from(command));
        args
    }
}

impl<R: CommandRunner> Communicator for SshCommunicator<R> {
    fn execute(&self, command: &str) -> Result<CommandOutput, GuestError> {
        debug!(host = %self.host, command, "running remote command");
        self.runner
            .run(&self.settings.ssh_bin, &self.command_args(command))
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is not set.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CommandInvocation, ScriptedRunner};
    use std::net::Ipv4Addr;

    fn communicator(runner: ScriptedRunner, settings: SshSettings) -> SshCommunicator<ScriptedRunner> {
        SshCommunicator::new(runner, settings, IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)))
    }

    #[test]
    fn execute_builds_batch_ssh_invocation() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let guest = communicator(runner.clone(), SshSettings::default());

        let output = guest.execute("sync").expect("scripted success");

        assert!(output.is_success());
        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(
            invocations.first().map(CommandInvocation::command_string),
            Some(String::from(
                "ssh -p 22 -o BatchMode=yes -o StrictHostKeyChecking=no \
                 -o UserKnownHostsFile=/dev/null root@198.51.100.7 -- sync"
            ))
        );
    }

    #[test]
    fn execute_passes_identity_file_and_custom_user() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let settings = SshSettings {
            ssh_bin: String::from("/usr/bin/ssh"),
            user: String::from("builder"),
            port: 2222,
            identity_file: Some(String::from("/keys/id_ed25519")),
            ..SshSettings::default()
        };
        let guest = communicator(runner.clone(), settings);

        guest.execute("uname -a").expect("scripted success");

        let invocation = runner.invocations().pop().expect("one invocation");
        assert_eq!(invocation.program, "/usr/bin/ssh");
        let rendered = invocation.command_string();
        assert!(rendered.contains("-p 2222 -i /keys/id_ed25519"), "{rendered}");
        assert!(rendered.ends_with("builder@198.51.100.7 -- uname -a"), "{rendered}");
    }

    #[test]
    fn into_success_reports_exit_code_and_stderr() {
        let output = CommandOutput {
            code: Some(3),
            stdout: String::new(),
            stderr: String::from("read-only file system\n"),
        };
        let err = output.into_success("sync").expect_err("non-zero exit");
        assert_eq!(
            err.to_string(),
            "command `sync` exited with status 3: read-only file system"
        );
    }

    #[test]
    fn into_success_handles_signal_termination() {
        let err = CommandOutput::default()
            .into_success("sync")
            .expect_err("missing exit code");
        assert!(err.to_string().contains("status unknown"));
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/etc/ssh/key"), "/etc/ssh/key");
    }
}
