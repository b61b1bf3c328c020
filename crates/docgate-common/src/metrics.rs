//! Metrics and observability for DocGate
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::error::{Error, Result};

/// Process-wide Prometheus handle, set once by [`install_recorder`]
static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Calling this more than once returns the handle installed first.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PROMETHEUS
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| Error::Internal(format!("Failed to install metrics recorder: {}", e)))
        })
        .cloned()
}

/// Export metrics in Prometheus text format
#[must_use]
pub fn export_prometheus() -> String {
    PROMETHEUS.get().map(PrometheusHandle::render).unwrap_or_default()
}

// ============================================================================
// Command Metrics
// ============================================================================

/// Record a dispatched command
pub fn record_command(command: &str, ingress: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("docgate_commands_total",
        "command" => command.to_string(),
        "ingress" => ingress,
        "status" => status
    )
    .increment(1);
}

/// Record a command failure by error code name
pub fn record_command_error(command: &str, code_name: &str) {
    counter!("docgate_command_errors_total",
        "command" => command.to_string(),
        "code" => code_name.to_string()
    )
    .increment(1);
}

/// Record command latency
pub fn record_command_latency(command: &str, latency_ms: f64) {
    histogram!("docgate_command_duration_ms", "command" => command.to_string()).record(latency_ms);
}

// ============================================================================
// Cursor Metrics
// ============================================================================

/// Update open cursors gauge
pub fn set_open_cursors(count: usize) {
    gauge!("docgate_open_cursors").set(count as f64);
}

/// Record cursors closed by the idle reaper
pub fn record_cursors_reaped(count: usize) {
    counter!("docgate_cursors_reaped_total").increment(count as u64);
}

/// Record documents returned in cursor batches
pub fn record_batch(documents: usize) {
    histogram!("docgate_cursor_batch_documents").record(documents as f64);
}

// ============================================================================
// Connection Metrics
// ============================================================================

/// Update active connections gauge
pub fn set_active_connections(protocol: &'static str, count: i64) {
    gauge!("docgate_active_connections", "protocol" => protocol).set(count as f64);
}

/// Record new connection
pub fn record_connection(protocol: &'static str) {
    counter!("docgate_connections_total", "protocol" => protocol).increment(1);
}

/// Record connection error
pub fn record_connection_error(protocol: &'static str, error_type: &'static str) {
    counter!("docgate_connection_errors_total",
        "protocol" => protocol,
        "error" => error_type
    )
    .increment(1);
}

/// Timer guard that records command latency when dropped
pub struct CommandTimer {
    start: Instant,
    command: String,
}

impl CommandTimer {
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            start: Instant::now(),
            command: command.to_string(),
        }
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for CommandTimer {
    fn drop(&mut self) {
        record_command_latency(&self.command, self.elapsed_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_helpers_do_not_panic() {
        record_command("find", "op_msg", true);
        set_open_cursors(3);
        let timer = CommandTimer::new("find");
        assert!(timer.elapsed_ms() >= 0.0);
    }

    #[test]
    fn test_install_recorder_is_idempotent() {
        install_recorder().unwrap();
        let handle = install_recorder().unwrap();
        record_command("ping", "data_api", true);
        assert!(handle.render().contains("docgate_commands_total"));
        assert!(export_prometheus().contains("docgate_commands_total"));
    }
}
