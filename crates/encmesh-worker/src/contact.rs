//! Background reconnection to the master.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use encmesh_cluster::{MasterLink, Registration};
use encmesh_models::NodeState;

use crate::metrics;
use crate::retry::{Backoff, FailureTracker};
use crate::state::NodeMachine;
use crate::worker::WorkerEvent;

/// Consecutive registration failures logged before going quiet.
const LOGGED_FAILURES: u32 = 3;

/// Registers the node with the master while it is NOT_CONNECTED.
///
/// At most one routine runs at a time. It retries with bounded exponential
/// backoff and reports success through the worker inbox; the worker calls
/// [`Contact::settle`] once it has handled the registration.
pub struct Contact {
    link: MasterLink,
    machine: Arc<NodeMachine>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    shutdown: watch::Receiver<bool>,
    base: Duration,
    max: Duration,
    running: Arc<AtomicBool>,
}

impl Contact {
    pub fn new(
        link: MasterLink,
        machine: Arc<NodeMachine>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
        base: Duration,
        max: Duration,
    ) -> Self {
        Self {
            link,
            machine,
            events,
            shutdown,
            base,
            max,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the routine unless one is already running. Never blocks.
    pub fn ensure_running(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let link = self.link.clone();
        let machine = Arc::clone(&self.machine);
        let events = self.events.clone();
        let mut shutdown = self.shutdown.clone();
        let running = Arc::clone(&self.running);
        let mut backoff = Backoff::new(self.base, self.max);

        tokio::spawn(async move {
            let mut failures = FailureTracker::new(LOGGED_FAILURES);
            loop {
                if *shutdown.borrow() || machine.status() != NodeState::NotConnected {
                    break;
                }

                match link.register(&machine.node()).await {
                    Ok(registration) => {
                        failures.record_success();
                        let unid = match registration {
                            Registration::Assigned(unid) => Some(unid),
                            Registration::Confirmed => None,
                        };
                        info!(
                            master = %link.addr(),
                            attempts = backoff.attempts() + 1,
                            "Registered with master"
                        );
                        if events.send(WorkerEvent::Connected(unid)).is_ok() {
                            return;
                        }
                        break;
                    }
                    Err(e) => {
                        metrics::record_reconnect_attempt();
                        let delay = backoff.next_delay();
                        if failures.record_failure() {
                            warn!(
                                master = %link.addr(),
                                error = %e,
                                retry_in_secs = delay.as_secs_f64(),
                                "Master unreachable"
                            );
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.wait_for(|stop| *stop) => break,
                        }
                    }
                }
            }
            debug!("Contact routine stopped");
            running.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Mark the last registration as handled, allowing a new routine.
    pub fn settle(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
