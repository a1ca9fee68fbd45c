//! Operator Metrics
//!
//! Prometheus collectors registered in the default registry and exposed by
//! the `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref RECONCILE_PASSES: IntCounterVec = register_int_counter_vec!(
        "csi_baremetal_operator_reconcile_passes_total",
        "Reconcile passes by result",
        &["result"]
    )
    .expect("Expected reconcile pass counter to register.");
    pub static ref RECONCILE_DURATION: Histogram = register_histogram!(
        "csi_baremetal_operator_reconcile_duration_seconds",
        "Duration of reconcile passes"
    )
    .expect("Expected reconcile duration histogram to register.");
    pub static ref RECONCILE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "csi_baremetal_operator_reconcile_errors_total",
        "Errors reported by reconcile passes, by component",
        &["component"]
    )
    .expect("Expected reconcile error counter to register.");
    pub static ref NODE_REMOVALS: IntCounterVec = register_int_counter_vec!(
        "csi_baremetal_operator_node_removals_total",
        "Node identity removals by outcome",
        &["outcome"]
    )
    .expect("Expected node removal counter to register.");
    pub static ref POD_EVICTIONS: IntCounter = register_int_counter!(
        "csi_baremetal_operator_pod_evictions_total",
        "Driver pods evicted from nodes in planned downtime"
    )
    .expect("Expected pod eviction counter to register.");
    pub static ref PATCHER_RETRIES: IntCounter = register_int_counter!(
        "csi_baremetal_operator_scheduler_patch_retries_total",
        "Scheduler patch retries after the readiness timeout"
    )
    .expect("Expected patch retry counter to register.");
    pub static ref SCHEDULERS_PENDING: IntGauge = register_int_gauge!(
        "csi_baremetal_operator_schedulers_pending_restart",
        "Scheduler pods that have not restarted since the extender config changed"
    )
    .expect("Expected pending scheduler gauge to register.");
    pub static ref RESERVATIONS_CLEANED: IntCounter = register_int_counter!(
        "csi_baremetal_operator_reservations_cleaned_total",
        "Capacity reservations removed by the cleanup task"
    )
    .expect("Expected reservation cleanup counter to register.");
}

/// Render every registered metric in the text exposition format
pub fn render() -> crate::error::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| crate::error::Error::Internal(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::error::Error::Internal(format!("metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        PATCHER_RETRIES.inc();
        RECONCILE_PASSES.with_label_values(&["success"]).inc();
        let text = render().unwrap();
        assert!(text.contains("csi_baremetal_operator_scheduler_patch_retries_total"));
        assert!(text.contains("csi_baremetal_operator_reconcile_passes_total"));
    }
}
