//! Metrics collection and exposition.
//!
//! # Metrics
//! - `daemon_log_records_total` (counter): records written, by level
//! - `daemon_pool_tasks_total` (counter): tasks spawned on the worker pool
//! - `daemon_pool_task_panics_total` (counter): pool tasks that panicked
//! - `daemon_storage_operations_total` (counter): storage calls by backend, op, outcome
//! - `daemon_registered_plugins` (gauge): plugins known to the cluster
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exposition is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observability::logging::Level;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_log_record(level: Level) {
    counter!("daemon_log_records_total", "level" => level.as_str()).increment(1);
}

pub fn record_pool_task() {
    counter!("daemon_pool_tasks_total").increment(1);
}

pub fn record_task_panic(task: &str) {
    counter!("daemon_pool_task_panics_total", "task" => task.to_string()).increment(1);
}

pub fn record_storage_op(backend: &'static str, op: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "daemon_storage_operations_total",
        "backend" => backend,
        "op" => op,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_registered_plugins(count: usize) {
    gauge!("daemon_registered_plugins").set(count as f64);
}
