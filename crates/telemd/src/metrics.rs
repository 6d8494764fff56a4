//! Prometheus metrics for the telemetry engine

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct TelemetryMetrics {
    pub cycles_total: IntCounter,
    pub fetch_total: IntCounterVec,
    pub listener_failures_total: IntCounter,
    pub listeners: IntGauge,
    pub cycle_duration_seconds: Histogram,

    registry: Arc<Registry>,
}

impl TelemetryMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cycles_total = register_int_counter_with_registry!(
            "telemd_cycles_total",
            "Total number of completed refresh cycles",
            registry
        )?;

        let fetch_total = register_int_counter_vec_with_registry!(
            "telemd_fetch_total",
            "Field fetches by result (ok, error, timeout)",
            &["result"],
            registry
        )?;

        let listener_failures_total = register_int_counter_with_registry!(
            "telemd_listener_failures_total",
            "Listener callbacks that returned an error or panicked",
            registry
        )?;

        let listeners = register_int_gauge_with_registry!(
            "telemd_listeners",
            "Currently registered listeners",
            registry
        )?;

        let cycle_duration_seconds = register_histogram_with_registry!(
            "telemd_cycle_duration_seconds",
            "Wall time of one refresh-and-notify cycle",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            registry
        )?;

        Ok(Self {
            cycles_total,
            fetch_total,
            listener_failures_total,
            listeners,
            cycle_duration_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Record one fetch outcome
    pub fn record_fetch(&self, result: &str) {
        self.fetch_total.with_label_values(&[result]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_counters() {
        let metrics = TelemetryMetrics::new().unwrap();
        metrics.cycles_total.inc();
        metrics.record_fetch("ok");
        metrics.record_fetch("timeout");

        let text = metrics.export().unwrap();
        assert!(text.contains("telemd_cycles_total 1"));
        assert!(text.contains("telemd_fetch_total{result=\"timeout\"} 1"));
    }
}
