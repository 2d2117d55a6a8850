//! Execution types
//!
//! Results of external commands. These only exist at runtime and are never
//! persisted.

use chrono::{DateTime, Utc};
use std::fmt;

/// How an external command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    /// Non-zero exit, or no exit code when killed by a signal
    Failed(Option<i32>),
    /// Could not be started at all
    SpawnFailed,
    /// Exceeded its deadline and was killed
    TimedOut,
    /// Abandoned, or never issued, because cancellation fired
    Cancelled,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Succeeded => write!(f, "succeeded"),
            CommandStatus::Failed(Some(code)) => write!(f, "failed (exit code {})", code),
            CommandStatus::Failed(None) => write!(f, "failed (terminated by signal)"),
            CommandStatus::SpawnFailed => write!(f, "failed to start"),
            CommandStatus::TimedOut => write!(f, "timed out"),
            CommandStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of running one external command
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: CommandStatus,
    /// stdout followed by stderr
    pub output: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(status: CommandStatus, output: Vec<u8>, started_at: DateTime<Utc>) -> Self {
        Self {
            status,
            output,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// A command that was never issued because cancellation had fired
    pub fn cancelled_before_start() -> Self {
        Self::new(CommandStatus::Cancelled, Vec::new(), Utc::now())
    }

    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Succeeded
    }

    pub fn cancelled(&self) -> bool {
        self.status == CommandStatus::Cancelled
    }

    pub fn timed_out(&self) -> bool {
        self.status == CommandStatus::TimedOut
    }

    /// Output as trimmed, lossily decoded text
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).trim().to_string()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
