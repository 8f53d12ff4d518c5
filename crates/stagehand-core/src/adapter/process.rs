//! Subprocess plumbing shared by the CLI-backed adapters.
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::adapter::error::{classify_cli_output, AdapterError, AdapterResult};

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a failed invocation into a classified error
    pub fn into_error(self, system: &str, action: &str) -> AdapterError {
        let stderr = self.stderr_str();
        let detail = if stderr.trim().is_empty() {
            self.stdout_str()
        } else {
            stderr
        };
        let detail = detail.trim();
        AdapterError::new(
            classify_cli_output(detail),
            system,
            format!("{} failed: {}", action, detail),
        )
    }
}

/// Builder-style description of one subprocess invocation
#[derive(Debug)]
pub struct Invocation<'a> {
    system: &'a str,
    command: Command,
    stdin: Option<&'a [u8]>,
}

impl<'a> Invocation<'a> {
    pub fn new(system: &'a str, program: impl AsRef<OsStr>) -> Self {
        let mut command = Command::new(program);
        command.kill_on_drop(true);
        Self {
            system,
            command,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.command.env(key, value);
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.current_dir(dir);
        self
    }

    pub fn stdin(mut self, input: &'a [u8]) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Run to completion and capture output.
    ///
    /// A missing binary is fatal; everything else is reported through
    /// [`CommandOutput::success`] for the caller to classify.
    pub async fn output(mut self) -> AdapterResult<CommandOutput> {
        log::debug!("{}: running {:?}", self.system, self.command.as_std());
        self.command
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = self.command.spawn().map_err(|e| {
            AdapterError::fatal(
                self.system,
                format!("failed to spawn {:?}: {}", self.command.as_std().get_program(), e),
            )
        })?;

        if let Some(input) = self.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input).await.map_err(|e| {
                    AdapterError::transient(self.system, format!("failed to write stdin: {}", e))
                })?;
                // Dropping the pipe closes stdin so the child sees EOF
                drop(pipe);
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            AdapterError::transient(self.system, format!("failed to wait for child: {}", e))
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Run and require success, classifying failures
    pub async fn checked(self, action: &str) -> AdapterResult<CommandOutput> {
        let system = self.system;
        let output = self.output().await?;
        if output.success {
            Ok(output)
        } else {
            Err(output.into_error(system, action))
        }
    }
}
