//! Pending-run signal
//!
//! A capacity-1 slot per resource. Raising it while it is already full is a
//! no-op, so any burst of triggers collapses into a single pending run and
//! the caller never waits.

use tokio::sync::mpsc::{self, error::TrySendError};

/// Sending half, held by the scheduler
#[derive(Debug, Clone)]
pub struct PendingSignal {
    tx: mpsc::Sender<()>,
}

/// Receiving half, owned by the resource's worker
#[derive(Debug)]
pub struct SignalReceiver {
    rx: mpsc::Receiver<()>,
}

/// Creates a connected signal pair
pub fn pending_signal() -> (PendingSignal, SignalReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (PendingSignal { tx }, SignalReceiver { rx })
}

impl PendingSignal {
    /// Marks a run as pending
    ///
    /// Returns `false` if a run was already pending or the worker is gone.
    pub fn raise(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Closed(())) => false,
        }
    }

    /// Whether the owning worker has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl SignalReceiver {
    /// Waits until the slot is full, then empties it
    ///
    /// Returns `false` once every sender is gone.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Empties the slot without waiting
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
