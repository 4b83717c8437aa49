//! Host mount primitives.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use super::command::{CommandOutput, CommandRunner, render_command};

/// Errors raised while formatting or mounting on the host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// Raised when a helper binary cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error reported by the OS.
        message: String,
    },
    /// Raised when a helper binary exits unsuccessfully.
    #[error("`{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        /// Rendered command line.
        command: String,
        /// Exit code, or `unknown` when killed by a signal.
        status: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// Raised when a target path cannot be created, inspected or removed.
    #[error("filesystem error at {path}: {message}")]
    Io {
        /// Path being prepared.
        path: Utf8PathBuf,
        /// Error reported by the OS.
        message: String,
    },
    /// Raised when no formatter is known for the filesystem type.
    #[error("unsupported filesystem type {fs_type}")]
    UnsupportedFilesystem {
        /// Requested filesystem type.
        fs_type: String,
    },
}

/// Mount operations the node orchestrator relies on.
pub trait MountExecutor: Send + Sync {
    /// Whether something is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the mount table cannot be inspected.
    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, MountError>;

    /// Formats `device` with `fs_type` when it carries no filesystem yet and
    /// mounts it at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when probing, formatting or mounting fails.
    fn format_and_mount(
        &self,
        device: &str,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError>;

    /// Bind-mounts `source` at `target`, read-only when requested.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when the bind mount fails.
    fn bind_mount(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        readonly: bool,
    ) -> Result<(), MountError>;

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError`] when `umount` fails.
    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError>;
}

/// [`MountExecutor`] backed by `findmnt`, `blkid`, `mkfs.*`, `mount` and
/// `umount`.
#[derive(Clone, Debug, Default)]
pub struct CommandMounter<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> CommandMounter<R> {
    /// Creates a mounter that runs helpers through `runner`.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    fn execute(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<(Vec<OsString>, CommandOutput), MountError> {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        debug!(command = %render_command(program, &os_args), "running mount helper");
        let output = self.runner.run(program, &os_args)?;
        Ok((os_args, output))
    }

    fn execute_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput, MountError> {
        let (rendered_args, output) = self.execute(program, args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(MountError::CommandFailure {
            command: render_command(program, &rendered_args),
            status: output
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string()),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    /// Filesystem already present on `device`, if any.
    fn existing_filesystem(&self, device: &str) -> Result<Option<String>, MountError> {
        let (args, output) = self.execute("blkid", &["-p", "-s", "TYPE", "-o", "value", device])?;
        match output.code {
            Some(0) => {
                let fs_type = output.stdout.trim();
                Ok((!fs_type.is_empty()).then(|| fs_type.to_owned()))
            }
            // blkid exits 2 when no recognisable signature is found.
            Some(2) => Ok(None),
            code => Err(MountError::CommandFailure {
                command: render_command("blkid", &args),
                status: code.map_or_else(|| String::from("unknown"), |value| value.to_string()),
                stderr: output.stderr.trim().to_owned(),
            }),
        }
    }

    fn format(&self, device: &str, fs_type: &str) -> Result<(), MountError> {
        match fs_type {
            "ext4" | "ext3" => {
                self.execute_checked(&format!("mkfs.{fs_type}"), &["-F", "-m0", device])?;
            }
            "xfs" => {
                self.execute_checked("mkfs.xfs", &[device])?;
            }
            other => {
                return Err(MountError::UnsupportedFilesystem {
                    fs_type: other.to_owned(),
                });
            }
        }
        Ok(())
    }
}

impl<R: CommandRunner> MountExecutor for CommandMounter<R> {
    fn is_mounted(&self, target: &Utf8Path) -> Result<bool, MountError> {
        let (args, output) = self.execute(
            "findmnt",
            &["--noheadings", "--output", "TARGET", "--mountpoint", target.as_str()],
        )?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(MountError::CommandFailure {
                command: render_command("findmnt", &args),
                status: code.map_or_else(|| String::from("unknown"), |value| value.to_string()),
                stderr: output.stderr.trim().to_owned(),
            }),
        }
    }

    fn format_and_mount(
        &self,
        device: &str,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let mount_type = match self.existing_filesystem(device)? {
            Some(existing) => existing,
            None => {
                self.format(device, fs_type)?;
                fs_type.to_owned()
            }
        };

        let joined = options.join(",");
        let mut args = vec!["-t", mount_type.as_str()];
        if !joined.is_empty() {
            args.extend(["-o", joined.as_str()]);
        }
        args.extend([device, target.as_str()]);
        self.execute_checked("mount", &args)?;
        Ok(())
    }

    fn bind_mount(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        readonly: bool,
    ) -> Result<(), MountError> {
        self.execute_checked("mount", &["--bind", source.as_str(), target.as_str()])?;
        if readonly {
            self.execute_checked("mount", &["-o", "remount,bind,ro", target.as_str()])?;
        }
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), MountError> {
        self.execute_checked("umount", &[target.as_str()])?;
        Ok(())
    }
}
