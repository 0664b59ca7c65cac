//! Cancellation of running encoder processes.
//!
//! A [`Canceller`] raises the cancel flag and waits until no process guarded
//! by the matching [`CancelWatch`] is alive. Cancelling is idempotent.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected canceller / watch pair.
pub fn cancel_pair() -> (Canceller, CancelWatch) {
    let (flag_tx, flag_rx) = watch::channel(false);
    let (busy_tx, busy_rx) = watch::channel(false);
    (
        Canceller {
            flag: Arc::new(flag_tx),
            busy: busy_rx,
        },
        CancelWatch {
            flag: flag_rx,
            busy: Arc::new(busy_tx),
        },
    )
}

/// Requesting side of a cancellation.
#[derive(Debug, Clone)]
pub struct Canceller {
    flag: Arc<watch::Sender<bool>>,
    busy: watch::Receiver<bool>,
}

impl Canceller {
    /// Request cancellation and wait until the guarded process is released.
    pub async fn cancel(&self) {
        self.flag.send_replace(true);
        let mut busy = self.busy.clone();
        // Err means the watch side is gone, so nothing can still be running.
        let _ = busy.wait_for(|running| !*running).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }
}

/// Observing side of a cancellation, held by the process runner.
#[derive(Debug, Clone)]
pub struct CancelWatch {
    flag: watch::Receiver<bool>,
    busy: Arc<watch::Sender<bool>>,
}

impl CancelWatch {
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once cancellation is requested. Never resolves if the
    /// canceller was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.flag.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Mark a process as alive until the returned guard is dropped.
    pub fn enter(&self) -> ProcessGuard {
        self.busy.send_replace(true);
        ProcessGuard {
            busy: Arc::clone(&self.busy),
        }
    }
}

/// Marks the guarded process as released on drop.
#[derive(Debug)]
pub struct ProcessGuard {
    busy: Arc<watch::Sender<bool>>,
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.busy.send_replace(false);
    }
}
