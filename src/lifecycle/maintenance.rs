//! Planned downtime eviction
//!
//! Nodes tainted for planned downtime lose every driver pod scheduled on them.
//! Identities and dependent resources stay untouched.

use super::state::has_maintenance_taint;
use crate::domain::ports::ResourceStoreRef;
use crate::error::{ignore_not_found, AggregateError, Result};
use crate::metrics;
use k8s_openapi::api::core::v1::Node;
use tracing::info;

/// Label selector matching every driver pod
pub const DRIVER_POD_SELECTOR: &str = "app.kubernetes.io/name=csi-baremetal";

pub struct MaintenanceEvictor {
    store: ResourceStoreRef,
}

impl MaintenanceEvictor {
    pub fn new(store: ResourceStoreRef) -> Self {
        Self { store }
    }

    /// Delete driver pods on every node in planned downtime; returns the
    /// number of pods deleted
    pub async fn evict(&self, nodes: &[Node]) -> Result<usize> {
        let mut errors = AggregateError::new();
        let mut evicted = 0;

        for node in nodes.iter().filter(|n| has_maintenance_taint(n)) {
            let node_name = node.metadata.name.as_deref().unwrap_or_default();
            let Some(pods) = errors.capture(
                self.store
                    .list_pods(None, DRIVER_POD_SELECTOR, Some(node_name))
                    .await,
            ) else {
                continue;
            };

            for pod in pods {
                let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
                let name = pod.metadata.name.as_deref().unwrap_or_default();
                if errors
                    .capture(ignore_not_found(self.store.delete_pod(namespace, name).await))
                    .is_some()
                {
                    info!(node = %node_name, pod = %name, "Evicted driver pod for planned downtime");
                    metrics::POD_EVICTIONS.inc();
                    evicted += 1;
                }
            }
        }

        errors.into_result().map(|_| evicted)
    }
}
