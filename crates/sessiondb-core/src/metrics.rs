//! Metrics for the session store
//!
//! Provides Prometheus metrics for monitoring a session store:
//! - Store operations (outcome, latency) per backend
//! - Operation errors by error kind
//! - Connection pool construction, recovery and acquisition latency
//! - Payload decode failures

use prometheus::{CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for a session store
#[derive(Clone)]
pub struct StoreMetrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    // Operation metrics
    /// Total operations by outcome
    pub operations_total: CounterVec,
    /// Operation duration
    pub operation_duration_seconds: HistogramVec,
    /// Failed operations by error kind
    pub operation_errors_total: CounterVec,

    // Connection pool metrics
    /// Pools constructed
    pub pools_created_total: CounterVec,
    /// Recovery cycles by outcome
    pub pool_rebuilds_total: CounterVec,
    /// Connection acquisition duration
    pub pool_acquire_duration_seconds: Histogram,

    // Codec metrics
    /// Payloads that could not be decoded
    pub decode_failures_total: CounterVec,
}

impl StoreMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations_total = CounterVec::new(
            Opts::new(
                "sessiondb_operations_total",
                "Total number of session store operations",
            ),
            &["backend", "operation", "outcome"],
        )?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sessiondb_operation_duration_seconds",
                "Session store operation duration in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0,
            ]),
            &["backend", "operation"],
        )?;

        let operation_errors_total = CounterVec::new(
            Opts::new(
                "sessiondb_operation_errors_total",
                "Total number of failed session store operations",
            ),
            &["backend", "operation", "error_type"],
        )?;

        let pools_created_total = CounterVec::new(
            Opts::new(
                "sessiondb_pools_created_total",
                "Total number of connection pools constructed",
            ),
            &["backend"],
        )?;

        let pool_rebuilds_total = CounterVec::new(
            Opts::new(
                "sessiondb_pool_rebuilds_total",
                "Total number of pool recovery cycles",
            ),
            &["backend", "outcome"],
        )?;

        let pool_acquire_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sessiondb_pool_acquire_duration_seconds",
                "Connection acquisition duration in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
        )?;

        let decode_failures_total = CounterVec::new(
            Opts::new(
                "sessiondb_decode_failures_total",
                "Total number of stored payloads that could not be decoded",
            ),
            &["backend"],
        )?;

        // Register all metrics
        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;
        registry.register(Box::new(operation_errors_total.clone()))?;
        registry.register(Box::new(pools_created_total.clone()))?;
        registry.register(Box::new(pool_rebuilds_total.clone()))?;
        registry.register(Box::new(pool_acquire_duration_seconds.clone()))?;
        registry.register(Box::new(decode_failures_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            operations_total,
            operation_duration_seconds,
            operation_errors_total,
            pools_created_total,
            pool_rebuilds_total,
            pool_acquire_duration_seconds,
            decode_failures_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completed operation
    pub fn record_operation(&self, backend: &str, operation: &str, outcome: &str, duration_secs: f64) {
        self.operations_total
            .with_label_values(&[backend, operation, outcome])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[backend, operation])
            .observe(duration_secs);
    }

    /// Record a failed operation
    pub fn record_operation_error(&self, backend: &str, operation: &str, error_type: &str) {
        self.operations_total
            .with_label_values(&[backend, operation, "error"])
            .inc();
        self.operation_errors_total
            .with_label_values(&[backend, operation, error_type])
            .inc();
    }

    pub fn record_pool_created(&self, backend: &str) {
        self.pools_created_total.with_label_values(&[backend]).inc();
    }

    /// Record the outcome of a recovery cycle
    pub fn record_pool_rebuild(&self, backend: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.pool_rebuilds_total
            .with_label_values(&[backend, outcome])
            .inc();
    }

    /// Record connection acquisition duration
    pub fn record_pool_acquire(&self, duration_secs: f64) {
        self.pool_acquire_duration_seconds.observe(duration_secs);
    }

    pub fn record_decode_failure(&self, backend: &str) {
        self.decode_failures_total.with_label_values(&[backend]).inc();
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new().expect("Failed to create session store metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &StoreMetrics, name: &str) -> f64 {
        let gathered = metrics.registry().gather();
        let family = gathered
            .iter()
            .find(|m| m.name() == name)
            .unwrap_or_else(|| panic!("{} metric not found", name));
        family
            .metric
            .iter()
            .map(|m| m.counter.as_ref().unwrap().value.unwrap())
            .sum()
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_pool_acquire(0.001);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_operation() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_operation("memory", "store", "insert", 0.001);
        metrics.record_operation("memory", "store", "update", 0.002);

        assert_eq!(counter_value(&metrics, "sessiondb_operations_total"), 2.0);
    }

    #[test]
    fn test_record_operation_error() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_operation_error("sqlite", "load", "timeout");

        assert_eq!(counter_value(&metrics, "sessiondb_operation_errors_total"), 1.0);
        assert_eq!(counter_value(&metrics, "sessiondb_operations_total"), 1.0);
    }

    #[test]
    fn test_record_pool_rebuild() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_pool_rebuild("postgres", true);
        metrics.record_pool_rebuild("postgres", false);

        let gathered = metrics.registry().gather();
        let rebuilds = gathered
            .iter()
            .find(|m| m.name() == "sessiondb_pool_rebuilds_total")
            .expect("pool_rebuilds_total metric not found");

        // Should have 2 label sets (success and failure)
        assert_eq!(rebuilds.metric.len(), 2);
    }

    #[test]
    fn test_record_decode_failure() {
        let metrics = StoreMetrics::new().unwrap();
        metrics.record_decode_failure("sqlite");
        assert_eq!(counter_value(&metrics, "sessiondb_decode_failures_total"), 1.0);
    }
}
