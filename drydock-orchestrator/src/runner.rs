//! External command execution
//!
//! Every git and docker invocation goes through a [`ProcessRunner`]. A
//! command runs under its own deadline and is abandoned (the child killed)
//! if the global cancellation fires while it runs. Once cancellation has
//! been observed no new command is started.

use async_trait::async_trait;
use chrono::Utc;
use drydock_core::domain::execution::{CommandStatus, ExecutionResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory, None = current directory
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Builds a spec from a whitespace separated command line
    pub fn from_command_line(line: &[String]) -> Option<Self> {
        let (program, args) = line.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command`, killing it after `timeout` or when `cancel` fires
    ///
    /// Returns a cancelled result without spawning anything if `cancel`
    /// has already fired.
    async fn execute(
        &self,
        command: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult;
}

/// Runs commands as child processes of the orchestrator
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn execute(
        &self,
        command: &CommandSpec,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        if cancel.is_cancelled() {
            debug!("Not starting '{}': cancellation requested", command);
            return ExecutionResult::cancelled_before_start();
        }

        info!("Running: {}", command);
        let started_at = Utc::now();

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        // Dropping the output future kills the child.
        let result = tokio::select! {
            output = process.output() => match output {
                Ok(output) => {
                    let mut combined = output.stdout;
                    combined.extend_from_slice(&output.stderr);
                    let status = if output.status.success() {
                        CommandStatus::Succeeded
                    } else {
                        CommandStatus::Failed(output.status.code())
                    };
                    ExecutionResult::new(status, combined, started_at)
                }
                Err(e) => ExecutionResult::new(
                    CommandStatus::SpawnFailed,
                    e.to_string().into_bytes(),
                    started_at,
                ),
            },
            _ = tokio::time::sleep(timeout) => {
                ExecutionResult::new(CommandStatus::TimedOut, Vec::new(), started_at)
            }
            _ = cancel.cancelled() => {
                ExecutionResult::new(CommandStatus::Cancelled, Vec::new(), started_at)
            }
        };

        match result.status {
            CommandStatus::Succeeded => {
                debug!("'{}' succeeded in {}ms", command, result.elapsed().num_milliseconds());
            }
            CommandStatus::Cancelled => {
                info!("'{}' abandoned: cancellation requested", command);
            }
            CommandStatus::TimedOut => {
                warn!("'{}' timed out after {:?}", command, timeout);
            }
            status => {
                warn!("'{}' {}: {}", command, status, result.output_text());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("git", ["pull", "--ff-only"]);
        assert_eq!(spec.to_string(), "git pull --ff-only");
    }

    #[test]
    fn test_command_spec_from_command_line() {
        let line = vec!["cargo".to_string(), "build".to_string(), "--release".to_string()];
        let spec = CommandSpec::from_command_line(&line).unwrap();
        assert_eq!(spec.program, "cargo");
        assert_eq!(spec.args, vec!["build", "--release"]);

        assert!(CommandSpec::from_command_line(&[]).is_none());
    }

    #[tokio::test]
    async fn test_execute_success_captures_output() {
        let result = SystemRunner::new()
            .execute(
                &sh("echo out; echo err >&2"),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.succeeded());
        assert_eq!(result.output_text(), "out\nerr");
    }

    #[tokio::test]
    async fn test_execute_failure_reports_exit_code() {
        let result = SystemRunner::new()
            .execute(&sh("exit 3"), Duration::from_secs(10), &CancellationToken::new())
            .await;

        assert_eq!(result.status, CommandStatus::Failed(Some(3)));
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let result = SystemRunner::new()
            .execute(
                &CommandSpec::new("drydock-no-such-program", Vec::<String>::new()),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, CommandStatus::SpawnFailed);
    }

    #[tokio::test]
    async fn test_execute_timeout_is_distinct_from_failure() {
        let result = SystemRunner::new()
            .execute(&sh("sleep 5"), Duration::from_millis(100), &CancellationToken::new())
            .await;

        assert!(result.timed_out());
        assert!(!result.cancelled());
    }

    #[tokio::test]
    async fn test_execute_not_started_after_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let result = SystemRunner::new()
            .execute(
                &sh(&format!("touch {}", marker.display())),
                Duration::from_secs(10),
                &cancel,
            )
            .await;

        assert!(result.cancelled());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_execute_abandoned_on_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = SystemRunner::new()
            .execute(&sh("sleep 5"), Duration::from_secs(30), &cancel)
            .await;

        assert!(result.cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
