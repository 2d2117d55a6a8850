//! Debounced job scheduler
//!
//! Owns one worker and one pending-run slot per resource, both created at
//! startup and kept until cancellation. Triggers never queue more than one
//! run per resource and never block the caller, and a resource can only
//! ever be registered once, so at most one run per resource executes at a
//! time.

mod signal;
mod worker;

pub use signal::{PendingSignal, SignalReceiver, pending_signal};
pub use worker::Schedule;

use drydock_core::domain::resource::ResourceKey;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::Pipeline;
use worker::Worker;

/// Errors raised while assembling the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("resource {0} is already registered")]
    DuplicateResource(ResourceKey),
}

/// What happened to a run request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    /// A run is now pending
    Queued,
    /// A run was already pending; nothing changed
    AlreadyPending,
    /// No worker exists for this resource
    UnknownResource,
    /// The worker has stopped
    Stopped,
}

struct Registration {
    pipeline: Arc<dyn Pipeline>,
    schedule: Schedule,
}

/// Collects resources before any worker starts
pub struct SchedulerBuilder {
    cancel: CancellationToken,
    registrations: Vec<(ResourceKey, Registration)>,
}

impl SchedulerBuilder {
    /// Creates a builder whose workers stop when `cancel` fires
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            registrations: Vec::new(),
        }
    }

    /// Registers a resource
    ///
    /// Fails if the resource is already registered.
    pub fn add(
        &mut self,
        key: ResourceKey,
        pipeline: Arc<dyn Pipeline>,
        schedule: Schedule,
    ) -> Result<&mut Self, SchedulerError> {
        if self.registrations.iter().any(|(existing, _)| *existing == key) {
            return Err(SchedulerError::DuplicateResource(key));
        }
        self.registrations
            .push((key, Registration { pipeline, schedule }));
        Ok(self)
    }

    /// Spawns one worker per registered resource
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> (Scheduler, Workers) {
        let mut slots = HashMap::with_capacity(self.registrations.len());
        let mut tasks = JoinSet::new();

        for (key, registration) in self.registrations {
            let (signal, receiver) = pending_signal();
            let worker = Worker {
                key: key.clone(),
                pipeline: registration.pipeline,
                schedule: registration.schedule,
                signal: receiver,
                cancel: self.cancel.clone(),
            };
            tasks.spawn(worker.run());
            slots.insert(key, signal);
        }

        info!("Scheduler started {} worker(s)", slots.len());

        (
            Scheduler {
                slots: Arc::new(slots),
            },
            Workers { tasks },
        )
    }
}

/// Handle used to request runs; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    slots: Arc<HashMap<ResourceKey, PendingSignal>>,
}

impl Scheduler {
    /// Asks for one run of `key`
    ///
    /// Never blocks. Requests made while a run is already pending are
    /// absorbed into that run.
    pub fn request_run(&self, key: &ResourceKey) -> RunRequest {
        let Some(signal) = self.slots.get(key) else {
            return RunRequest::UnknownResource;
        };

        if signal.raise() {
            debug!("Run requested for {}", key);
            RunRequest::Queued
        } else if signal.is_closed() {
            RunRequest::Stopped
        } else {
            debug!("Run already pending for {}", key);
            RunRequest::AlreadyPending
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.slots.contains_key(key)
    }
}

/// The running workers, awaited during drain
pub struct Workers {
    tasks: JoinSet<ResourceKey>,
}

impl Workers {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every worker to stop
    ///
    /// Only returns once each worker has acknowledged termination. Returns
    /// the resources whose workers stopped cleanly.
    pub async fn drain(mut self) -> Vec<ResourceKey> {
        let mut stopped = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(key) => {
                    debug!("Worker {} acknowledged shutdown", key);
                    stopped.push(key);
                }
                Err(e) => warn!("Worker task failed: {}", e),
            }
        }

        info!("All workers stopped ({} clean)", stopped.len());
        stopped
    }
}
