//! Prometheus metrics for the CSI node plugin
//!
//! Provides metrics for monitoring node RPCs and the mount/format calls
//! they issue.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: Total number of node operations by type and status
    pub const NODE_OPERATIONS_TOTAL: &str = "csi_node_operations_total";
    /// Histogram: Duration of node operations in seconds
    pub const NODE_OPERATION_DURATION_SECONDS: &str = "csi_node_operation_duration_seconds";
    /// Counter: mount/umount/mkfs invocations by call and status
    pub const NODE_MOUNT_CALLS_TOTAL: &str = "csi_node_mount_calls_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record a node operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::NODE_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::NODE_OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record one invocation of a mount primitive
pub fn record_mount_call(call: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(names::NODE_MOUNT_CALLS_TOTAL, "call" => call.to_string(), "status" => status)
        .increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(self.operation, error_code, duration);
    }

    /// Complete the operation from its result
    pub fn finish<T>(self, result: &crate::error::Result<T>) {
        match result {
            Ok(_) => self.success(),
            Err(e) => self.failure(e.label()),
        }
    }
}
