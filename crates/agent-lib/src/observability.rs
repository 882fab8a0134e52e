//! Prometheus metrics for the agent
//!
//! Registered once into the default registry; the binary exposes them on
//! `/metrics`.

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, HistogramTimer,
    IntCounter, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for reconciliation latency (seconds); runtime calls
/// dominate, so the range reaches well into seconds
const RECONCILE_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    reconcile_duration_seconds: Histogram,
    heartbeats_sent_total: IntCounter,
    heartbeat_errors_total: IntCounter,
    workloads_desired: IntGauge,
    events_queued: IntGauge,
    scrape_targets: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_duration_seconds: register_histogram!(
                "edge_agent_reconcile_duration_seconds",
                "Time spent reconciling one configuration update",
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            heartbeats_sent_total: register_int_counter!(
                "edge_agent_heartbeats_sent_total",
                "Heartbeats successfully handed to the transport"
            )
            .expect("Failed to register heartbeats_sent_total"),

            heartbeat_errors_total: register_int_counter!(
                "edge_agent_heartbeat_errors_total",
                "Heartbeat sends the transport rejected"
            )
            .expect("Failed to register heartbeat_errors_total"),

            workloads_desired: register_int_gauge!(
                "edge_agent_workloads_desired",
                "Workloads in the last applied configuration"
            )
            .expect("Failed to register workloads_desired"),

            events_queued: register_int_gauge!(
                "edge_agent_events_queued",
                "Events waiting for the next heartbeat drain"
            )
            .expect("Failed to register events_queued"),

            scrape_targets: register_int_gauge!(
                "edge_agent_scrape_targets",
                "Scrape targets currently installed"
            )
            .expect("Failed to register scrape_targets"),
        }
    }
}

/// Lightweight handle to the process-wide metrics instance.
///
/// Clones share the same underlying metrics.
#[derive(Clone, Default)]
pub struct AgentMetrics {
    _private: (),
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn inner() -> &'static AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn reconcile_timer(&self) -> HistogramTimer {
        Self::inner().reconcile_duration_seconds.start_timer()
    }

    pub fn inc_heartbeats_sent(&self) {
        Self::inner().heartbeats_sent_total.inc();
    }

    pub fn inc_heartbeat_errors(&self) {
        Self::inner().heartbeat_errors_total.inc();
    }

    pub fn set_workloads_desired(&self, count: i64) {
        Self::inner().workloads_desired.set(count);
    }

    pub fn set_events_queued(&self, count: i64) {
        Self::inner().events_queued.set(count);
    }

    pub fn set_scrape_targets(&self, count: i64) {
        Self::inner().scrape_targets.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let metrics = AgentMetrics::new();
        metrics.inc_heartbeats_sent();
        metrics.set_workloads_desired(3);
        // a second handle shares the same registry entries
        let other = AgentMetrics::new();
        other.inc_heartbeats_sent();
        other.set_scrape_targets(1);
    }
}
