//! Observability infrastructure for the telemetry monitor
//!
//! Provides:
//! - Prometheus metrics (ingestion counters, detection latency, dedup
//!   suppressions, tracked-state gauges)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MonitorMetricsInner {
    events_ingested: IntCounter,
    malformed_events: IntCounter,
    anomalies_detected: IntCounterVec,
    dedup_suppressed: IntCounter,
    sink_errors: IntCounter,
    detection_latency_seconds: Histogram,
    periodic_scan_seconds: Histogram,
    tracked_series: IntGauge,
    tracked_entities: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            events_ingested: register_int_counter!(
                "monitor_events_ingested_total",
                "Telemetry events accepted by the engine"
            )
            .expect("Failed to register events_ingested_total"),

            malformed_events: register_int_counter!(
                "monitor_malformed_events_total",
                "Telemetry events rejected at schema validation"
            )
            .expect("Failed to register malformed_events_total"),

            anomalies_detected: register_int_counter_vec!(
                "monitor_anomalies_detected_total",
                "Findings surfaced after deduplication",
                &["type"]
            )
            .expect("Failed to register anomalies_detected_total"),

            dedup_suppressed: register_int_counter!(
                "monitor_dedup_suppressed_total",
                "Findings dropped by the deduplication cooldown"
            )
            .expect("Failed to register dedup_suppressed_total"),

            sink_errors: register_int_counter!(
                "monitor_sink_errors_total",
                "Failures publishing findings to the downstream sink"
            )
            .expect("Failed to register sink_errors_total"),

            detection_latency_seconds: register_histogram!(
                "monitor_detection_latency_seconds",
                "Time spent running all detectors for one event",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_latency_seconds"),

            periodic_scan_seconds: register_histogram!(
                "monitor_periodic_scan_seconds",
                "Time spent in one periodic analysis pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register periodic_scan_seconds"),

            tracked_series: register_int_gauge!(
                "monitor_tracked_series",
                "Metric series currently held in the rolling store"
            )
            .expect("Failed to register tracked_series"),

            tracked_entities: register_int_gauge!(
                "monitor_tracked_entities",
                "Distinct (provider, model, application) keys observed"
            )
            .expect("Failed to register tracked_entities"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_events_ingested(&self) {
        self.inner().events_ingested.inc();
    }

    pub fn inc_malformed_events(&self) {
        self.inner().malformed_events.inc();
    }

    pub fn inc_anomalies_detected(&self, anomaly_type: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[anomaly_type])
            .inc();
    }

    pub fn inc_dedup_suppressed(&self) {
        self.inner().dedup_suppressed.inc();
    }

    pub fn inc_sink_errors(&self) {
        self.inner().sink_errors.inc();
    }

    pub fn observe_detection_latency(&self, duration_secs: f64) {
        self.inner().detection_latency_seconds.observe(duration_secs);
    }

    pub fn observe_periodic_scan(&self, duration_secs: f64) {
        self.inner().periodic_scan_seconds.observe(duration_secs);
    }

    pub fn set_tracked(&self, series: i64, entities: i64) {
        self.inner().tracked_series.set(series);
        self.inner().tracked_entities.set(entities);
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for findings, rejected
/// events and lifecycle transitions.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Log a surfaced finding
    pub fn log_anomaly(
        &self,
        anomaly_type: &str,
        entity: &str,
        severity: &str,
        value: f64,
        expected: f64,
        description: &str,
    ) {
        match severity {
            "critical" | "high" => {
                warn!(
                    event = "anomaly_detected",
                    service = %self.service_name,
                    anomaly_type = %anomaly_type,
                    entity = %entity,
                    severity = %severity,
                    value = value,
                    expected = expected,
                    description = %description,
                    "Anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    service = %self.service_name,
                    anomaly_type = %anomaly_type,
                    entity = %entity,
                    severity = %severity,
                    value = value,
                    expected = expected,
                    description = %description,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log a rejected input event
    pub fn log_malformed_event(&self, reason: &str) {
        warn!(
            event = "malformed_event",
            service = %self.service_name,
            reason = %reason,
            "Skipping malformed telemetry event"
        );
    }

    /// Log completion of a periodic analysis pass
    pub fn log_periodic_scan(&self, findings: usize, elapsed_ms: u128) {
        info!(
            event = "periodic_scan",
            service = %self.service_name,
            findings = findings,
            elapsed_ms = elapsed_ms as u64,
            "Periodic analysis complete"
        );
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "monitor_started",
            service = %self.service_name,
            version = %version,
            "Telemetry monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Telemetry monitor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle_is_usable() {
        // Registration happens once per process; exercising the handle is
        // the meaningful part here.
        let metrics = MonitorMetrics::new();

        metrics.inc_events_ingested();
        metrics.inc_malformed_events();
        metrics.inc_anomalies_detected("statistical_spike");
        metrics.inc_dedup_suppressed();
        metrics.observe_detection_latency(0.001);
        metrics.observe_periodic_scan(0.02);
        metrics.set_tracked(3, 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("monitor-test");
        assert_eq!(logger.service_name, "monitor-test");
    }
}
