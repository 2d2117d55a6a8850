//! Lifecycle controller
//!
//! Moves the process through `Running -> Draining -> Upgrading -> Relaunched`.
//!
//! - Draining: broadcast cancellation, give the HTTP server a bounded grace
//!   period for in-flight requests, then wait until every worker has stopped.
//! - Upgrading: pull the orchestrator's own source and rebuild it with a fresh
//!   cancellation token (the global one has already fired).
//! - Relaunching: replace the process with the rebuilt executable, or with
//!   the previous one if the rebuild or the exec failed. The process never
//!   stops without attempting a relaunch.
//!
//! An operator shutdown drains the same way and then exits.

use anyhow::{Context, Result};
use drydock_core::domain::lifecycle::{LifecycleState, ShutdownReason};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SelfUpgradeConfig;
use crate::runner::{CommandSpec, ProcessRunner};
use crate::scheduler::Workers;

/// Replaces the running process
pub trait Relauncher: Send + Sync {
    /// Starts `executable` in place of the current process
    ///
    /// Returning `Ok` means the new process has taken over and this one may
    /// exit; an in-place exec only ever returns the error.
    fn relaunch(&self, executable: &Path) -> std::io::Result<()>;
}

/// Re-executes in place, keeping arguments and environment
#[derive(Debug, Default)]
pub struct ExecRelauncher;

impl Relauncher for ExecRelauncher {
    fn relaunch(&self, executable: &Path) -> std::io::Result<()> {
        use std::os::unix::process::CommandExt;

        info!("Re-executing {}", executable.display());
        Err(std::process::Command::new(executable)
            .args(std::env::args_os().skip(1))
            .exec())
    }
}

/// How the controller finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Drained after an operator shutdown
    Terminated,
    /// A new process has taken over
    Relaunched,
}

/// Cheap handle for requesting a shutdown and observing the state
#[derive(Clone)]
pub struct LifecycleHandle {
    trigger: mpsc::Sender<ShutdownReason>,
    state: watch::Receiver<LifecycleState>,
}

impl LifecycleHandle {
    /// Asks for drain-and-upgrade
    ///
    /// Never blocks; returns `false` if a shutdown was already requested.
    pub fn request_upgrade(&self) -> bool {
        self.request(ShutdownReason::Upgrade)
    }

    /// Asks for drain-and-exit
    pub fn request_shutdown(&self) -> bool {
        self.request(ShutdownReason::Terminate)
    }

    fn request(&self, reason: ShutdownReason) -> bool {
        let accepted = self.trigger.try_send(reason).is_ok();
        if accepted {
            info!("Shutdown requested ({:?})", reason);
        }
        accepted
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }
}

/// Collaborators and settings of the controller
pub struct LifecycleSettings {
    pub self_upgrade: Option<SelfUpgradeConfig>,
    /// Executable running right now, captured at startup
    pub current_executable: PathBuf,
    pub command_timeout: Duration,
    pub shutdown_grace: Duration,
}

pub struct LifecycleController {
    cancel: CancellationToken,
    runner: Arc<dyn ProcessRunner>,
    relauncher: Arc<dyn Relauncher>,
    settings: LifecycleSettings,
    trigger: mpsc::Receiver<ShutdownReason>,
    state: watch::Sender<LifecycleState>,
}

/// Creates a controller in `Running` and its handle
pub fn lifecycle(
    cancel: CancellationToken,
    runner: Arc<dyn ProcessRunner>,
    relauncher: Arc<dyn Relauncher>,
    settings: LifecycleSettings,
) -> (LifecycleHandle, LifecycleController) {
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (state_tx, state_rx) = watch::channel(LifecycleState::Running);

    (
        LifecycleHandle {
            trigger: trigger_tx,
            state: state_rx,
        },
        LifecycleController {
            cancel,
            runner,
            relauncher,
            settings,
            trigger: trigger_rx,
            state: state_tx,
        },
    )
}

impl LifecycleController {
    /// Waits for a shutdown request, then drains and upgrades or exits
    pub async fn run(mut self, workers: Workers, server: JoinHandle<()>) -> Result<Exit> {
        let reason = self
            .trigger
            .recv()
            .await
            .unwrap_or(ShutdownReason::Terminate);

        self.drain(workers, server).await;

        match reason {
            ShutdownReason::Terminate => {
                info!("Drained, exiting");
                Ok(Exit::Terminated)
            }
            ShutdownReason::Upgrade => {
                let rebuilt = self.upgrade().await;
                self.relaunch(rebuilt)
            }
        }
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        info!("Lifecycle {} -> {}", previous, next);
    }

    async fn drain(&self, workers: Workers, mut server: JoinHandle<()>) {
        self.transition(LifecycleState::Draining);
        self.cancel.cancel();

        match tokio::time::timeout(self.settings.shutdown_grace, &mut server).await {
            Ok(Ok(())) => info!("HTTP server stopped"),
            Ok(Err(e)) => warn!("HTTP server task failed: {}", e),
            Err(_) => {
                warn!(
                    "HTTP server still busy after {:?}, aborting it",
                    self.settings.shutdown_grace
                );
                server.abort();
            }
        }

        info!("Waiting for {} worker(s) to stop", workers.len());
        workers.drain().await;
    }

    /// Pulls and rebuilds own source; returns the new executable on success
    async fn upgrade(&self) -> Option<PathBuf> {
        self.transition(LifecycleState::Upgrading);

        let Some(self_upgrade) = &self.settings.self_upgrade else {
            warn!("Self-upgrade is not configured, relaunching unchanged");
            return None;
        };

        // The global token has fired; upgrade commands get their own.
        let cancel = CancellationToken::new();
        let source_dir = &self_upgrade.source_dir;

        let pull = CommandSpec::new(
            "git",
            [
                "-C".to_string(),
                source_dir.display().to_string(),
                "pull".to_string(),
                "--ff-only".to_string(),
            ],
        );
        let result = self
            .runner
            .execute(&pull, self.settings.command_timeout, &cancel)
            .await;
        if !result.succeeded() {
            error!(
                "Could not update own source ({}): {}",
                result.status,
                result.output_text()
            );
            return None;
        }

        let build = CommandSpec::from_command_line(&self_upgrade.build_command)?.in_dir(source_dir);
        let result = self
            .runner
            .execute(&build, self.settings.command_timeout, &cancel)
            .await;
        if !result.succeeded() {
            error!("Rebuild failed ({}): {}", result.status, result.output_text());
            return None;
        }

        let binary = if self_upgrade.binary.is_absolute() {
            self_upgrade.binary.clone()
        } else {
            source_dir.join(&self_upgrade.binary)
        };
        info!("Rebuilt {}", binary.display());
        Some(binary)
    }

    fn relaunch(&self, rebuilt: Option<PathBuf>) -> Result<Exit> {
        let previous = &self.settings.current_executable;

        if let Some(binary) = rebuilt {
            match self.relauncher.relaunch(&binary) {
                Ok(()) => return Ok(self.relaunched()),
                Err(e) => error!(
                    "Could not launch rebuilt {}: {}, falling back to {}",
                    binary.display(),
                    e,
                    previous.display()
                ),
            }
        }

        self.relauncher
            .relaunch(previous)
            .with_context(|| format!("Failed to relaunch {}", previous.display()))?;
        Ok(self.relaunched())
    }

    fn relaunched(&self) -> Exit {
        self.transition(LifecycleState::Relaunched);
        Exit::Relaunched
    }
}
