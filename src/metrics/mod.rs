//! Prometheus metrics for backend nodes
//!
//! Exposed over HTTP by `server::serve` for Prometheus scraping.

mod server;

pub use server::{serve, serve_listener};

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::OnceLock;

use crate::health::NodeStatus;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    pub registry: Registry,

    /// Node operations by kind (query, execute_stmt, begin, ...)
    pub operations_total: IntCounterVec,
    /// Operation latency histogram (in seconds)
    pub operation_duration_seconds: HistogramVec,
    /// Failed operations by kind and failure class (acquire, filter, backend)
    pub operation_errors_total: IntCounterVec,

    /// Health check results
    pub health_check_total: IntCounterVec,
    /// 1 while the node is healthy, 0 otherwise
    pub node_healthy: IntGaugeVec,
    /// Status flips
    pub status_changes_total: IntCounterVec,
    /// Requests currently executing on the node
    pub in_flight: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new("athena_node_operations_total", "Total number of node operations"),
            &["node", "op"],
        )
        .unwrap();

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "athena_node_operation_duration_seconds",
                "Node operation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                10.0,
            ]),
            &["node", "op"],
        )
        .unwrap();

        let operation_errors_total = IntCounterVec::new(
            Opts::new(
                "athena_node_operation_errors_total",
                "Total number of failed node operations",
            ),
            &["node", "op", "kind"],
        )
        .unwrap();

        let health_check_total = IntCounterVec::new(
            Opts::new(
                "athena_node_health_check_total",
                "Total number of health checks by result",
            ),
            &["node", "result"],
        )
        .unwrap();

        let node_healthy = IntGaugeVec::new(
            Opts::new("athena_node_healthy", "Whether the node is currently healthy"),
            &["node"],
        )
        .unwrap();

        let status_changes_total = IntCounterVec::new(
            Opts::new(
                "athena_node_status_changes_total",
                "Total number of node status changes by new status",
            ),
            &["node", "status"],
        )
        .unwrap();

        let in_flight = IntGaugeVec::new(
            Opts::new("athena_node_in_flight", "Requests currently executing on the node"),
            &["node"],
        )
        .unwrap();

        registry
            .register(Box::new(operations_total.clone()))
            .unwrap();
        registry
            .register(Box::new(operation_duration_seconds.clone()))
            .unwrap();
        registry
            .register(Box::new(operation_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(health_check_total.clone()))
            .unwrap();
        registry
            .register(Box::new(node_healthy.clone()))
            .unwrap();
        registry
            .register(Box::new(status_changes_total.clone()))
            .unwrap();
        registry.register(Box::new(in_flight.clone())).unwrap();

        Self {
            registry,
            operations_total,
            operation_duration_seconds,
            operation_errors_total,
            health_check_total,
            node_healthy,
            status_changes_total,
            in_flight,
        }
    }

    /// Record a completed operation
    pub fn record_operation(&self, node: &str, op: &str, duration_secs: f64) {
        self.operations_total.with_label_values(&[node, op]).inc();
        self.operation_duration_seconds
            .with_label_values(&[node, op])
            .observe(duration_secs);
    }

    pub fn record_operation_error(&self, node: &str, op: &str, kind: &str) {
        self.operation_errors_total
            .with_label_values(&[node, op, kind])
            .inc();
    }

    pub fn record_health_check(&self, node: &str, result: &str) {
        self.health_check_total
            .with_label_values(&[node, result])
            .inc();
    }

    pub fn set_node_status(&self, node: &str, status: NodeStatus) {
        let healthy = i64::from(status == NodeStatus::Healthy);
        self.node_healthy.with_label_values(&[node]).set(healthy);
    }

    pub fn record_status_change(&self, node: &str, status: NodeStatus) {
        self.status_changes_total
            .with_label_values(&[node, status.as_str()])
            .inc();
        self.set_node_status(node, status);
    }

    pub fn set_in_flight(&self, node: &str, value: i64) {
        self.in_flight.with_label_values(&[node]).set(value);
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_node_series() {
        let metrics = Metrics::new();
        metrics.record_operation("m1", "query", 0.002);
        metrics.record_operation_error("m1", "query", "backend");
        metrics.record_status_change("m1", NodeStatus::Unhealthy);
        metrics.set_in_flight("m1", 3);

        let text = metrics.gather();
        assert!(text.contains("athena_node_operations_total{node=\"m1\",op=\"query\"} 1"));
        assert!(text.contains("athena_node_healthy{node=\"m1\"} 0"));
        assert!(text.contains("athena_node_in_flight{node=\"m1\"} 3"));
        assert!(text.contains("kind=\"backend\""));
    }
}
