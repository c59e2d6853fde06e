//! Command execution seam used by the build stages.

use crate::provision::manifest::CommandForm;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

/// Where and with what environment a command runs.
#[derive(Debug, Clone, Default)]
pub struct ExecEnv {
    /// Host working directory.
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Last non-empty stderr line, for error messages.
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
    }
}

/// Runs build commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `argv` to completion. A non-zero exit is not an error here.
    async fn execute(&self, argv: &[String], env: &ExecEnv) -> ArchlensResult<CommandOutput>;

    /// Run a manifest command (shell form through `/bin/sh -c`).
    async fn execute_command(
        &self,
        command: &CommandForm,
        env: &ExecEnv,
    ) -> ArchlensResult<CommandOutput> {
        self.execute(&command.argv(), env).await
    }
}

/// Run a command and turn a non-zero exit into a process error.
pub async fn execute_checked(
    executor: &dyn CommandExecutor,
    argv: &[String],
    env: &ExecEnv,
) -> ArchlensResult<CommandOutput> {
    let output = executor.execute(argv, env).await?;
    if !output.success() {
        return Err(ArchlensError::Process(format!(
            "'{}' exited with {}: {}",
            argv.join(" "),
            output
                .status
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output.stderr_tail()
        )));
    }
    Ok(output)
}

/// Executes commands as host child processes.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, argv: &[String], env: &ExecEnv) -> ArchlensResult<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ArchlensError::Process("empty command".into()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &env.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &env.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!(program = %program, args = ?args, cwd = ?env.cwd, "Executing command");

        let child = cmd
            .spawn()
            .map_err(|e| ArchlensError::Process(format!("failed to spawn '{}': {}", program, e)))?;

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| {
                    ArchlensError::Process(format!(
                        "'{}' timed out after {}s",
                        program,
                        timeout.as_secs()
                    ))
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ArchlensError::Process(format!("failed to wait for '{}': {}", program, e)))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
