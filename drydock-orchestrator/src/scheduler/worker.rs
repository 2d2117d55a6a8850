//! Resource worker
//!
//! One long-lived loop per resource. The loop waits on three things at once:
//! its pending-run signal, its staleness deadline and the global
//! cancellation. A trigger or an elapsed deadline runs the pipeline exactly
//! once; cancellation ends the loop. The loop body is never re-entered while
//! a run is in progress, so runs of one resource are strictly serialized.

use drydock_core::domain::resource::ResourceKey;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::signal::SignalReceiver;
use crate::config::MAX_DURATION;
use crate::service::{Pipeline, RunOutcome};

/// When a worker runs without being triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Delay before the first untriggered run
    pub first_delay: Duration,
    /// Maximum time between the end of one run and the next
    pub interval: Duration,
}

impl Schedule {
    /// Forced re-run every `interval`
    pub fn every(interval: Duration) -> Self {
        Self {
            first_delay: interval,
            interval,
        }
    }

    /// Like [`Schedule::every`], with the first run at a random point of the
    /// first interval so that many workers do not fire together
    pub fn jittered(interval: Duration) -> Self {
        let millis = interval.as_millis().min(u64::MAX as u128) as u64;
        let first_delay = if millis == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..millis))
        };
        Self {
            first_delay,
            interval,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Wake {
    Triggered,
    Stale,
}

pub(crate) struct Worker {
    pub(crate) key: ResourceKey,
    pub(crate) pipeline: Arc<dyn Pipeline>,
    pub(crate) schedule: Schedule,
    pub(crate) signal: SignalReceiver,
    pub(crate) cancel: CancellationToken,
}

impl Worker {
    /// Runs until cancellation, then returns its key as acknowledgement
    pub(crate) async fn run(mut self) -> ResourceKey {
        info!("Worker {} started", self.key);
        let mut deadline = deadline_after(self.schedule.first_delay);

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                pending = self.signal.wait() => {
                    if !pending {
                        warn!("Worker {} lost its scheduler", self.key);
                        break;
                    }
                    Wake::Triggered
                }
                _ = tokio::time::sleep_until(deadline) => Wake::Stale,
            };

            self.signal.clear();
            if self.cancel.is_cancelled() {
                break;
            }

            let outcome = run_once(&self.key, self.pipeline.as_ref(), &self.cancel, wake).await;
            if outcome == RunOutcome::Cancelled {
                break;
            }

            deadline = deadline_after(self.schedule.interval);
        }

        info!("Worker {} stopped", self.key);
        self.key
    }
}

/// `now + delay`, clamped instead of overflowing
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + MAX_DURATION)
}

async fn run_once(
    key: &ResourceKey,
    pipeline: &dyn Pipeline,
    cancel: &CancellationToken,
    wake: Wake,
) -> RunOutcome {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", resource = %key, %run_id);

    async {
        debug!("Woken by {:?}", wake);
        let started = Instant::now();

        // A panicking pipeline must not take the worker down with it.
        let outcome = AssertUnwindSafe(pipeline.run(key, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| RunOutcome::Aborted("pipeline panicked".to_string()));

        match &outcome {
            RunOutcome::Completed { failed: 0, .. } => {
                info!("Run {} in {:?}", outcome, started.elapsed())
            }
            RunOutcome::Completed { .. } => warn!("Run {} in {:?}", outcome, started.elapsed()),
            RunOutcome::Aborted(_) => error!("Run {}", outcome),
            RunOutcome::Cancelled => info!("Run cancelled, worker stopping"),
        }

        outcome
    }
    .instrument(span)
    .await
}
