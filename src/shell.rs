//! Synchronous-looking process execution used by the container collaborators.
//!
//! A non-zero exit status is data, not an error: callers inspect
//! [`CommandOutput::success`]. Only a failure to spawn (binary missing,
//! permission denied) is reported as an error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BootstrapError, BootstrapResult};

/// Result of running an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// An argv-style command with an optional working directory.
#[derive(Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Values to mask whenever the command is displayed or logged.
    redact: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            redact: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.redact.push(secret);
        }
        self
    }

    /// Printable form with secrets masked.
    pub fn display(&self) -> String {
        let mut line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        for secret in &self.redact {
            line = line.replace(secret.as_str(), "[REDACTED]");
        }
        line
    }
}

impl std::fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellCommand")
            .field("command", &self.display())
            .field("cwd", &self.cwd)
            .finish()
    }
}

/// Capability to run external commands.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &ShellCommand) -> BootstrapResult<CommandOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Default)]
pub struct SystemShell;

#[async_trait]
impl ShellRunner for SystemShell {
    async fn run(&self, command: &ShellCommand) -> BootstrapResult<CommandOutput> {
        debug!("Executing: {}", command.display());

        let mut process = Command::new(&command.program);
        process.args(&command.args);
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        let output = process.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BootstrapError::Container(format!(
                    "Command not found: {}. Is it installed and in your PATH?",
                    command.program
                ))
            } else {
                BootstrapError::Container(format!(
                    "Failed to run {}: {}",
                    command.display(),
                    e
                ))
            }
        })?;

        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success {
            debug!(
                "Command exited with {}: {}",
                output.status,
                command.display()
            );
        }

        Ok(result)
    }
}
