//! Node Lifecycle Reconciler
//!
//! One pass runs in three steps:
//! 1. label transitions on node identities, mirroring the removal taint
//! 2. removal of identities whose node is gone and whose label is set
//! 3. eviction of driver pods from nodes in planned downtime
//!
//! Every failure is collected and the pass keeps going.

use super::maintenance::MaintenanceEvictor;
use super::removal::NodeRemoval;
use super::state::{has_removal_label, has_removal_taint, NodeState, DRAIN_KEY, REMOVAL_VALUE};
use crate::crd::CsibmNode;
use crate::domain::ports::{LabelPatch, ResourceStoreRef};
use crate::error::{AggregateError, Error, Result};
use crate::metrics;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What a lifecycle pass did
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub labeled: Vec<String>,
    pub unlabeled: Vec<String>,
    pub removed: Vec<String>,
    pub evicted: usize,
    pub errors: AggregateError,
}

impl LifecycleReport {
    pub fn into_result(self) -> Result<()> {
        self.errors.into_result()
    }
}

pub struct NodeLifecycleReconciler {
    store: ResourceStoreRef,
    removal: NodeRemoval,
    maintenance: MaintenanceEvictor,
}

impl NodeLifecycleReconciler {
    pub fn new(store: ResourceStoreRef) -> Self {
        Self {
            removal: NodeRemoval::new(store.clone()),
            maintenance: MaintenanceEvictor::new(store.clone()),
            store,
        }
    }

    /// Compute the state of every identity against the live nodes
    pub fn plan<'a>(nodes: &[Node], identities: &'a [CsibmNode]) -> Vec<(&'a CsibmNode, NodeState)> {
        let live: BTreeMap<&str, &Node> = nodes
            .iter()
            .filter_map(|n| n.metadata.name.as_deref().map(|name| (name, n)))
            .collect();

        identities
            .iter()
            .map(|identity| {
                let node = identity.hostname().and_then(|h| live.get(h));
                let state = NodeState::compute(
                    node.is_some(),
                    node.map_or(false, |n| has_removal_taint(n)),
                    has_removal_label(identity),
                );
                (identity, state)
            })
            .collect()
    }

    /// Run one lifecycle pass over the given live nodes
    pub async fn reconcile(&self, nodes: &[Node]) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        let identities = match self.store.list_node_identities().await {
            Ok(identities) => identities,
            Err(e) => {
                report.errors.push(e);
                return report;
            }
        };

        let plan = Self::plan(nodes, &identities);
        let mut removals = Vec::new();

        // Label transitions first, removals after
        for (identity, state) in plan {
            let name = identity.metadata.name.clone().unwrap_or_default();
            debug!(identity = %name, state = %state, "Computed node state");
            match state {
                NodeState::Stable => {}
                NodeState::NeedsLabel => {
                    if report
                        .errors
                        .capture(self.set_removal_label(&name, true).await)
                        .is_some()
                    {
                        info!(identity = %name, "Labeled node identity for removal");
                        report.labeled.push(name);
                    }
                }
                NodeState::NeedsUnlabel => {
                    if report
                        .errors
                        .capture(self.set_removal_label(&name, false).await)
                        .is_some()
                    {
                        info!(identity = %name, "Removal taint withdrawn, unlabeled node identity");
                        report.unlabeled.push(name);
                    }
                }
                NodeState::NeedsRemoval => removals.push(identity),
            }
        }

        for identity in removals {
            let name = identity.metadata.name.clone().unwrap_or_default();
            match self.removal.remove(identity).await {
                Ok(()) => {
                    metrics::NODE_REMOVALS.with_label_values(&["removed"]).inc();
                    report.removed.push(name);
                }
                Err(e @ Error::NodeAgentRunning { .. }) => {
                    info!(identity = %name, "{}", e);
                    metrics::NODE_REMOVALS.with_label_values(&["postponed"]).inc();
                    report.errors.push(e);
                }
                Err(e) => {
                    warn!(identity = %name, error = %e, "Node removal incomplete");
                    metrics::NODE_REMOVALS.with_label_values(&["failed"]).inc();
                    report.errors.push(e);
                }
            }
        }

        if let Some(evicted) = report.errors.capture(self.maintenance.evict(nodes).await) {
            report.evicted = evicted;
        }

        report
    }

    async fn set_removal_label(&self, identity: &str, present: bool) -> Result<()> {
        let mut patch = LabelPatch::new();
        patch.insert(
            DRAIN_KEY.to_string(),
            present.then(|| REMOVAL_VALUE.to_string()),
        );
        self.store.patch_node_identity_labels(identity, &patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{DependentKind, DependentRecord, DependentRef, ResourceStore};
    use crate::store::{fixtures, MemoryStore};
    use std::sync::Arc;

    fn drain_label(store: &MemoryStore, identity: &str) -> Option<String> {
        store
            .identity(identity)
            .and_then(|i| i.metadata.labels)
            .and_then(|l| l.get(DRAIN_KEY).cloned())
    }

    fn seed_dependents(store: &MemoryStore, node_id: &str) {
        for kind in DependentKind::ALL {
            store.add_dependent(DependentRecord {
                reference: DependentRef {
                    kind,
                    name: format!("{}-{}", kind, node_id).to_lowercase(),
                    namespace: (kind == DependentKind::Volume).then(|| "default".to_string()),
                },
                node_id: node_id.into(),
                finalizers: vec!["csi-baremetal.dell.com/protect".into()],
            });
        }
    }

    /// Cluster with one node per transition plus a stable one
    fn cluster() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());

        store.add_node(fixtures::with_taint(
            fixtures::node("tainted", "5.4"),
            DRAIN_KEY,
            "drain",
            "NoSchedule",
        ));
        store.add_identity(fixtures::identity("id-tainted", "uuid-tainted", "tainted"));

        store.add_node(fixtures::node("healed", "5.4"));
        store.add_identity(fixtures::identity_with_label(
            "id-healed", "uuid-healed", "healed", DRAIN_KEY, "drain",
        ));

        store.add_identity(fixtures::identity_with_label(
            "id-gone", "uuid-gone", "gone", DRAIN_KEY, "drain",
        ));
        seed_dependents(&store, "uuid-gone");

        store.add_node(fixtures::node("steady", "5.4"));
        store.add_identity(fixtures::identity("id-steady", "uuid-steady", "steady"));
        seed_dependents(&store, "uuid-steady");

        store
    }

    async fn run(store: &Arc<MemoryStore>) -> LifecycleReport {
        let nodes = store.list_nodes().await.unwrap();
        NodeLifecycleReconciler::new(store.clone()).reconcile(&nodes).await
    }

    #[test]
    fn test_plan_states() {
        let nodes = vec![fixtures::with_taint(
            fixtures::node("a", "5.4"),
            DRAIN_KEY,
            "drain",
            "NoSchedule",
        )];
        let identities = vec![
            fixtures::identity("id-a", "u-a", "a"),
            fixtures::identity_with_label("id-b", "u-b", "b", DRAIN_KEY, "drain"),
            fixtures::identity("id-c", "u-c", "c"),
        ];

        let states: Vec<_> = NodeLifecycleReconciler::plan(&nodes, &identities)
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        assert_eq!(
            states,
            vec![NodeState::NeedsLabel, NodeState::NeedsRemoval, NodeState::Stable]
        );
    }

    #[tokio::test]
    async fn test_label_transitions_and_removal() {
        let store = cluster();

        let report = run(&store).await;

        assert!(report.errors.is_empty(), "{}", report.errors);
        assert_eq!(report.labeled, vec!["id-tainted".to_string()]);
        assert_eq!(report.unlabeled, vec!["id-healed".to_string()]);
        assert_eq!(report.removed, vec!["id-gone".to_string()]);

        assert_eq!(drain_label(&store, "id-tainted").as_deref(), Some("drain"));
        assert_eq!(drain_label(&store, "id-healed"), None);
        assert!(store.identity("id-gone").is_none());
        assert!(store.dependents().iter().all(|d| d.node_id == "uuid-steady"));
        assert_eq!(store.dependents().len(), 4);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let store = cluster();
        run(&store).await;
        let before = store.mutations();

        let report = run(&store).await;

        assert!(report.errors.is_empty());
        assert_eq!(store.mutations().since(&before).total(), 0);
    }

    #[tokio::test]
    async fn test_removal_waits_for_node_agent() {
        let store = cluster();
        store.add_pod(fixtures::running_pod(
            "csi",
            "csi-baremetal-node-gone",
            "app=csi-baremetal-node",
            "gone",
            Some(chrono::Utc::now()),
        ));

        let report = run(&store).await;

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors.errors()[0], Error::NodeAgentRunning { .. }));
        assert!(report.into_result().unwrap_err().is_retryable());
        assert!(store.identity("id-gone").is_some());
        let gone: Vec<_> = store
            .dependents()
            .into_iter()
            .filter(|d| d.node_id == "uuid-gone")
            .collect();
        assert_eq!(gone.len(), 4);
        assert!(gone.iter().all(|d| !d.finalizers.is_empty()));
    }

    #[tokio::test]
    async fn test_label_failure_does_not_stop_removals() {
        let store = cluster();
        store.fail_on("CsibmNode/id-tainted");

        let report = run(&store).await;

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.removed, vec!["id-gone".to_string()]);
        assert_eq!(report.unlabeled, vec!["id-healed".to_string()]);
    }
}
