//! Prometheus metrics for the worker.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use encmesh_models::{NodeState, TaskKind};

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Tasks
    pub const TASKS_ACCEPTED_TOTAL: &str = "encmesh_tasks_accepted_total";
    pub const TASKS_REFUSED_TOTAL: &str = "encmesh_tasks_refused_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "encmesh_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "encmesh_tasks_failed_total";
    pub const POOL_ACTIVE_UNITS: &str = "encmesh_pool_active_units";

    // Node
    pub const STATUS_TRANSITIONS_TOTAL: &str = "encmesh_status_transitions_total";
    pub const NOTIFICATION_FAILURES_TOTAL: &str = "encmesh_master_notification_failures_total";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "encmesh_reconnect_attempts_total";
}

pub fn record_task_accepted(kind: TaskKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::TASKS_ACCEPTED_TOTAL, &labels).increment(1);
}

pub fn record_task_refused(kind: TaskKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::TASKS_REFUSED_TOTAL, &labels).increment(1);
}

pub fn record_task_finished(kind: TaskKind, success: bool) {
    let labels = [("kind", kind.as_str().to_string())];
    if success {
        counter!(names::TASKS_COMPLETED_TOTAL, &labels).increment(1);
    } else {
        counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
    }
}

pub fn set_active_units(kind: TaskKind, count: usize) {
    let labels = [("kind", kind.as_str().to_string())];
    gauge!(names::POOL_ACTIVE_UNITS, &labels).set(count as f64);
}

pub fn record_transition(to: NodeState) {
    let labels = [("to", to.as_str().to_string())];
    counter!(names::STATUS_TRANSITIONS_TOTAL, &labels).increment(1);
}

pub fn record_notification_failure() {
    counter!(names::NOTIFICATION_FAILURES_TOTAL).increment(1);
}

pub fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS_TOTAL).increment(1);
}
