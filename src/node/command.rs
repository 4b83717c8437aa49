//! Host command execution used by the mount layer.

use std::ffi::OsString;
use std::process::Command;

use super::MountError;

/// Exit status and captured streams of a helper binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the helper exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Runs host helper binaries such as `mount` and `mkfs.ext4`.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, MountError>;
}

/// Runs helpers as child processes of the driver.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, MountError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| MountError::Spawn {
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

/// Renders a command line with shell quoting for log and error messages.
pub(crate) fn render_command(program: &str, args: &[OsString]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_escape::unix::escape(program.into()).into_owned());
    parts.extend(
        args.iter()
            .map(|arg| shell_escape::unix::escape(arg.to_string_lossy()).into_owned()),
    );
    parts.join(" ")
}
