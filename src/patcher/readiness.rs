//! Readiness ledger
//!
//! Records, per control-plane node, whether its scheduler has restarted since
//! the extender configuration changed. The ledger lives in a ConfigMap so it
//! survives operator restarts and can be read by other components.

use crate::domain::ports::ResourceStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const STATUS_CONFIG_MAP: &str = "schedulerpatcher-status";
pub const STATUS_KEY: &str = "nodes.yaml";

const SCHEDULER_CONTAINER: &str = "kube-scheduler";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub node_name: String,
    pub kube_scheduler: String,
    pub restarted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessStatusList {
    pub nodes: Vec<ReadinessStatus>,
}

impl ReadinessStatusList {
    /// Statuses for the given scheduler pods, ordered by node
    pub fn from_pods(pods: &[Pod], epoch: DateTime<Utc>) -> Self {
        let mut nodes: Vec<_> = pods
            .iter()
            .map(|pod| ReadinessStatus {
                node_name: pod
                    .spec
                    .as_ref()
                    .and_then(|s| s.node_name.clone())
                    .unwrap_or_default(),
                kube_scheduler: pod.metadata.name.clone().unwrap_or_default(),
                restarted: scheduler_restarted(pod, epoch),
            })
            .collect();
        nodes.sort_by(|a, b| (&a.node_name, &a.kube_scheduler).cmp(&(&b.node_name, &b.kube_scheduler)));
        Self { nodes }
    }

    pub fn all_restarted(&self) -> bool {
        self.nodes.iter().all(|n| n.restarted)
    }

    pub fn pending(&self) -> usize {
        self.nodes.iter().filter(|n| !n.restarted).count()
    }
}

fn scheduler_container(pod: &Pod) -> Option<&ContainerStatus> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    statuses
        .iter()
        .find(|c| c.name == SCHEDULER_CONTAINER)
        .or_else(|| statuses.first())
}

/// Whether the scheduler container is running and started at or after `epoch`
pub fn scheduler_restarted(pod: &Pod, epoch: DateTime<Utc>) -> bool {
    scheduler_container(pod)
        .and_then(|c| c.state.as_ref())
        .and_then(|s| s.running.as_ref())
        .and_then(|r| r.started_at.as_ref())
        .map_or(false, |started| started.0 >= epoch)
}

/// ConfigMap-backed ledger in the operator namespace
pub struct ReadinessLedger<'a> {
    store: &'a dyn ResourceStore,
    namespace: &'a str,
}

impl<'a> ReadinessLedger<'a> {
    pub fn new(store: &'a dyn ResourceStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    pub async fn read(&self) -> Result<Option<ReadinessStatusList>> {
        let Some(cm) = self.store.get_config_map(self.namespace, STATUS_CONFIG_MAP).await? else {
            return Ok(None);
        };
        match cm.data.as_ref().and_then(|d| d.get(STATUS_KEY)) {
            Some(raw) => Ok(Some(serde_yaml::from_str(raw)?)),
            None => Ok(None),
        }
    }

    /// Persist `statuses`, skipping the write when nothing changed
    pub async fn write(&self, statuses: &ReadinessStatusList) -> Result<()> {
        let mut data = BTreeMap::new();
        data.insert(STATUS_KEY.to_string(), serde_yaml::to_string(statuses)?);

        match self.store.get_config_map(self.namespace, STATUS_CONFIG_MAP).await? {
            None => {
                self.store
                    .create_config_map(&ConfigMap {
                        metadata: ObjectMeta {
                            name: Some(STATUS_CONFIG_MAP.to_string()),
                            namespace: Some(self.namespace.to_string()),
                            ..Default::default()
                        },
                        data: Some(data),
                        ..Default::default()
                    })
                    .await
            }
            Some(existing) if existing.data.as_ref() == Some(&data) => {
                debug!("Readiness ledger unchanged");
                Ok(())
            }
            Some(mut existing) => {
                existing.data = Some(data);
                self.store.replace_config_map(&existing).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{fixtures, MemoryStore};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn scheduler_pod(node: &str, started: Option<DateTime<Utc>>) -> Pod {
        fixtures::running_pod(
            "kube-system",
            &format!("kube-scheduler-{}", node),
            "component=kube-scheduler",
            node,
            started,
        )
    }

    #[test]
    fn test_restart_is_measured_against_epoch() {
        assert!(!scheduler_restarted(&scheduler_pod("m1", Some(t0() - Duration::seconds(1))), t0()));
        assert!(scheduler_restarted(&scheduler_pod("m1", Some(t0())), t0()));
        assert!(scheduler_restarted(&scheduler_pod("m1", Some(t0() + Duration::seconds(1))), t0()));
        assert!(!scheduler_restarted(&scheduler_pod("m1", None), t0()));
    }

    #[test]
    fn test_status_list_sorted_by_node() {
        let pods = vec![
            scheduler_pod("m2", Some(t0() + Duration::seconds(1))),
            scheduler_pod("m1", Some(t0() - Duration::seconds(1))),
        ];
        let list = ReadinessStatusList::from_pods(&pods, t0());
        assert_eq!(list.nodes[0].node_name, "m1");
        assert!(!list.nodes[0].restarted);
        assert!(list.nodes[1].restarted);
        assert_eq!(list.pending(), 1);
        assert!(!list.all_restarted());
    }

    #[tokio::test]
    async fn test_ledger_round_trip_and_no_op_write() {
        let store = MemoryStore::new();
        let ledger = ReadinessLedger::new(&store, "csi");
        let list = ReadinessStatusList::from_pods(&[scheduler_pod("m1", Some(t0()))], t0());

        ledger.write(&list).await.unwrap();
        ledger.write(&list).await.unwrap();

        assert_eq!(store.mutations().total(), 1);
        assert_eq!(ledger.read().await.unwrap(), Some(list));

        let raw = store.config_map("csi", STATUS_CONFIG_MAP).unwrap().data.unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&raw[STATUS_KEY]).unwrap();
        assert_eq!(doc["nodes"][0]["node_name"], "m1");
        assert_eq!(doc["nodes"][0]["kube_scheduler"], "kube-scheduler-m1");
        assert_eq!(doc["nodes"][0]["restarted"], true);
    }
}
