//! Metrics for observability.
//!
//! Emits through the `metrics` facade for:
//! - Source and target connections
//! - Change events pulled from the source
//! - Per-target write outcomes
//! - Checkpoint persistence
//! - Coordinator state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `forwarder_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! No exporter is installed by the crate. Without a recorder every call is
//! a no-op, so the binary runs the same with or without one.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cdc_forwarder::metrics;
//! use std::time::Duration;
//!
//! // After each pulled event
//! metrics::record_event_read("insert");
//!
//! // After the fan-out of one event
//! metrics::record_dispatch("insert", Duration::from_millis(4));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a connection attempt to the source or a target.
pub fn record_connection(endpoint: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("forwarder_connections_total", "endpoint" => endpoint.to_string(), "status" => status).increment(1);
}

/// Gauge for number of connected targets.
pub fn set_connected_targets(count: usize) {
    gauge!("forwarder_connected_targets").set(count as f64);
}

/// Record a change event pulled from the source.
pub fn record_event_read(operation: &str) {
    counter!("forwarder_events_read_total", "operation" => operation.to_string()).increment(1);
}

/// Record an event that could not be translated into a write.
pub fn record_malformed_event(operation: &str) {
    counter!("forwarder_malformed_events_total", "operation" => operation.to_string()).increment(1);
}

/// Record the outcome of one write on one target.
pub fn record_target_write(target: &str, operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "forwarder_target_writes_total",
        "target" => target.to_string(),
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record how long the fan-out of one event took across all targets.
pub fn record_dispatch(operation: &str, duration: Duration) {
    histogram!("forwarder_dispatch_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record checkpoint persistence.
pub fn record_checkpoint_save(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("forwarder_checkpoint_saves_total", "status" => status).increment(1);
}

/// Record an error by category.
pub fn record_error(error_type: &str) {
    counter!("forwarder_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Gauge for coordinator state.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Init" => 0.0,
        "Connecting" => 1.0,
        "Watching" => 2.0,
        "Dispatching" => 3.0,
        "Checkpointing" => 4.0,
        "Stopping" => 5.0,
        "Stopped" => 6.0,
        "Failed" => 7.0,
        _ => -1.0,
    };
    gauge!("forwarder_engine_state").set(value);
}
