//! Service layer
//!
//! Services contain the orchestrator's business logic: what a build run and
//! a mirror run actually do for one resource. They are invoked by the
//! scheduler's workers and talk to the outside world only through the
//! process runner and the repositories.
//!
//! All services are trait-based to enable testing and dependency injection.

mod build;
mod mirror;

use async_trait::async_trait;
use drydock_core::domain::resource::ResourceKey;
use std::fmt;
use tokio_util::sync::CancellationToken;

// Re-export implementations
pub use build::{BuildPipeline, BuildSettings};
pub use mirror::{MirrorPipeline, MirrorSettings};

/// How one pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit of work was attempted
    Completed { succeeded: usize, failed: usize },
    /// The run stopped before doing its work (e.g., checkout failed)
    Aborted(String),
    /// Cancellation fired during the run
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed { succeeded, failed } => {
                write!(f, "completed ({} succeeded, {} failed)", succeeded, failed)
            }
            RunOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Work performed for one resource each time its worker wakes up
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Runs the pipeline once for `resource`
    ///
    /// Failures are reported through the outcome; they never escape the run.
    async fn run(&self, resource: &ResourceKey, cancel: &CancellationToken) -> RunOutcome;
}
