//! Lifecycle domain model
//!
//! States the orchestrator process moves through between start and relaunch.

use serde::{Deserialize, Serialize};

/// Process lifecycle state
///
/// Transitions only move forward:
/// `Running -> Draining -> Upgrading -> Relaunched`. An operator shutdown
/// leaves from `Draining` straight to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Workers active, HTTP server accepting
    Running,
    /// Cancellation broadcast, waiting for workers to stop
    Draining,
    /// Rebuilding own executable
    Upgrading,
    /// Process image replaced (terminal for this instance)
    Relaunched,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Draining => write!(f, "draining"),
            LifecycleState::Upgrading => write!(f, "upgrading"),
            LifecycleState::Relaunched => write!(f, "relaunched"),
        }
    }
}

/// Why the orchestrator is leaving `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Own source repository changed on trunk
    Upgrade,
    /// Operator asked the process to stop
    Terminate,
}
