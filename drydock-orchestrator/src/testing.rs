//! Test doubles for the orchestrator's collaborators

use async_trait::async_trait;
use chrono::Utc;
use drydock_core::domain::execution::{CommandStatus, ExecutionResult};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::repository::{NotifyError, WebhookNotifier};
use crate::runner::{CommandSpec, ProcessRunner};

/// Records every command; fails or cancels commands matching a pattern
#[derive(Default)]
pub struct ScriptedRunner {
    pub commands: Mutex<Vec<String>>,
    failing: Vec<String>,
    timing_out: Vec<String>,
    cancel_on: Option<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose rendered text contains `pattern` exit with status 1
    pub fn failing(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    /// Commands whose rendered text contains `pattern` hit their deadline
    pub fn timing_out(mut self, pattern: &str) -> Self {
        self.timing_out.push(pattern.to_string());
        self
    }

    /// The command containing `pattern` fires cancellation while it runs
    pub fn cancelling_on(mut self, pattern: &str) -> Self {
        self.cancel_on = Some(pattern.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn execute(
        &self,
        command: &CommandSpec,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        if cancel.is_cancelled() {
            return ExecutionResult::cancelled_before_start();
        }

        let rendered = command.to_string();
        self.commands.lock().unwrap().push(rendered.clone());

        // Like git, a clone creates its destination before transferring anything.
        if command.program == "git" && command.args.first().is_some_and(|a| a == "clone") {
            if let Some(dest) = command.args.last() {
                std::fs::create_dir_all(Path::new(dest).join(".git")).unwrap();
            }
        }

        if self.cancel_on.as_deref().is_some_and(|p| rendered.contains(p)) {
            cancel.cancel();
            return ExecutionResult::new(CommandStatus::Cancelled, Vec::new(), Utc::now());
        }

        let status = if self.timing_out.iter().any(|p| rendered.contains(p.as_str())) {
            CommandStatus::TimedOut
        } else if self.failing.iter().any(|p| rendered.contains(p.as_str())) {
            CommandStatus::Failed(Some(1))
        } else {
            CommandStatus::Succeeded
        };
        ExecutionResult::new(status, b"scripted output".to_vec(), Utc::now())
    }
}

/// Records notifications; rejects callbacks containing a pattern
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    rejecting: Vec<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, pattern: &str) -> Self {
        self.rejecting.push(pattern.to_string());
        self
    }

    /// (callback, image) pairs, sorted
    pub fn sent(&self) -> Vec<(String, String)> {
        let mut sent = self.sent.lock().unwrap().clone();
        sent.sort();
        sent
    }
}

#[async_trait]
impl WebhookNotifier for RecordingNotifier {
    async fn notify(&self, callback_url: &str, image_name: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((callback_url.to_string(), image_name.to_string()));

        if self.rejecting.iter().any(|p| callback_url.contains(p.as_str())) {
            return Err(NotifyError::Rejected { status: 503 });
        }
        Ok(())
    }
}
