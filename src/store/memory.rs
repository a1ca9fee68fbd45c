//! In-Memory Resource Store
//!
//! A [`ResourceStore`] that keeps cluster objects in process memory. Used by
//! standalone mode and by the test suite, which relies on its mutation
//! counters and failure injection.
//!
//! Deleting a dependent resource that still carries finalizers only marks it
//! for deletion; it disappears once its finalizers are cleared, mirroring the
//! API server.

use super::selector_matches;
use crate::crd::{AvailableCapacityReservation, CsibmNode, Scheduler, SecondaryScheduler};
use crate::domain::ports::{
    DependentKind, DependentRecord, DependentRef, LabelPatch, ResourceStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

type NamespacedKey = (String, String);

#[derive(Debug, Clone)]
struct StoredDependent {
    record: DependentRecord,
    deletion_requested: bool,
}

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<String, Node>,
    pods: BTreeMap<NamespacedKey, Pod>,
    identities: BTreeMap<String, CsibmNode>,
    dependents: BTreeMap<DependentRef, StoredDependent>,
    config_maps: BTreeMap<NamespacedKey, ConfigMap>,
    daemon_sets: BTreeMap<NamespacedKey, DaemonSet>,
    schedulers: BTreeMap<String, Scheduler>,
    secondary_schedulers: BTreeMap<NamespacedKey, SecondaryScheduler>,
    reservations: BTreeMap<String, AvailableCapacityReservation>,
}

/// Counts of successful write calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSnapshot {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl MutationSnapshot {
    pub fn total(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }

    /// Mutations performed since `earlier`
    pub fn since(&self, earlier: &MutationSnapshot) -> MutationSnapshot {
        MutationSnapshot {
            creates: self.creates - earlier.creates,
            updates: self.updates - earlier.updates,
            deletes: self.deletes - earlier.deletes,
        }
    }
}

#[derive(Default)]
struct MutationCounters {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

/// In-memory cluster model
pub struct MemoryStore {
    state: RwLock<ClusterState>,
    now: RwLock<DateTime<Utc>>,
    failures: RwLock<BTreeSet<String>>,
    counters: MutationCounters,
    next_resource_version: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClusterState::default()),
            now: RwLock::new(Utc::now()),
            failures: RwLock::new(BTreeSet::new()),
            counters: MutationCounters::default(),
            next_resource_version: AtomicU64::new(1),
        }
    }

    // =========================================================================
    // Clock & fault injection
    // =========================================================================

    /// Timestamp stamped on objects created from now on
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Make every call touching `target` fail. Targets look like
    /// `"Drive/drive-1"`, `"ConfigMap/ns/name"` or `"list:Drive"`.
    pub fn fail_on(&self, target: impl Into<String>) {
        self.failures.write().insert(target.into());
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    fn check(&self, target: &str) -> Result<()> {
        if self.failures.read().contains(target) {
            return Err(Error::Internal(format!("injected failure on {}", target)));
        }
        Ok(())
    }

    pub fn mutations(&self) -> MutationSnapshot {
        MutationSnapshot {
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
        }
    }

    fn created(&self) {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
    }

    fn updated(&self) {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn deleted(&self) {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn stamp_new(&self, meta: &mut ObjectMeta) {
        meta.creation_timestamp = Some(Time(*self.now.read()));
        self.bump_version(meta);
    }

    fn bump_version(&self, meta: &mut ObjectMeta) {
        let version = self.next_resource_version.fetch_add(1, Ordering::Relaxed);
        meta.resource_version = Some(version.to_string());
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.state.write().nodes.insert(name, node);
    }

    pub fn remove_node(&self, name: &str) {
        self.state.write().nodes.remove(name);
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = namespaced_key(&pod.metadata);
        self.state.write().pods.insert(key, pod);
    }

    pub fn add_identity(&self, identity: CsibmNode) {
        let name = identity.metadata.name.clone().unwrap_or_default();
        self.state.write().identities.insert(name, identity);
    }

    pub fn add_dependent(&self, record: DependentRecord) {
        self.state.write().dependents.insert(
            record.reference.clone(),
            StoredDependent {
                record,
                deletion_requested: false,
            },
        );
    }

    /// Insert a ConfigMap as-is, keeping any creation timestamp it carries
    pub fn add_config_map(&self, config_map: ConfigMap) {
        let key = namespaced_key(&config_map.metadata);
        self.state.write().config_maps.insert(key, config_map);
    }

    pub fn add_scheduler(&self, mut scheduler: Scheduler) {
        self.bump_version(&mut scheduler.metadata);
        let name = scheduler.metadata.name.clone().unwrap_or_default();
        self.state.write().schedulers.insert(name, scheduler);
    }

    pub fn add_secondary_scheduler(&self, mut scheduler: SecondaryScheduler) {
        self.bump_version(&mut scheduler.metadata);
        let key = namespaced_key(&scheduler.metadata);
        self.state.write().secondary_schedulers.insert(key, scheduler);
    }

    pub fn add_reservation(&self, reservation: AvailableCapacityReservation) {
        let name = reservation.metadata.name.clone().unwrap_or_default();
        self.state.write().reservations.insert(name, reservation);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn node(&self, name: &str) -> Option<Node> {
        self.state.read().nodes.get(name).cloned()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state.read().pods.values().cloned().collect()
    }

    pub fn identity(&self, name: &str) -> Option<CsibmNode> {
        self.state.read().identities.get(name).cloned()
    }

    pub fn dependents(&self) -> Vec<DependentRecord> {
        self.state
            .read()
            .dependents
            .values()
            .map(|d| d.record.clone())
            .collect()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .read()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn daemon_set(&self, namespace: &str, name: &str) -> Option<DaemonSet> {
        self.state
            .read()
            .daemon_sets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn scheduler(&self, name: &str) -> Option<Scheduler> {
        self.state.read().schedulers.get(name).cloned()
    }

    pub fn secondary_scheduler(&self, namespace: &str, name: &str) -> Option<SecondaryScheduler> {
        self.state
            .read()
            .secondary_schedulers
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn reservations(&self) -> Vec<AvailableCapacityReservation> {
        self.state.read().reservations.values().cloned().collect()
    }
}

fn namespaced_key(meta: &ObjectMeta) -> NamespacedKey {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Optimistic concurrency: an expected version must match the stored one
fn check_version(meta: &ObjectMeta, expected: Option<&str>, kind: &str) -> Result<()> {
    match expected {
        Some(expected) if meta.resource_version.as_deref() != Some(expected) => {
            Err(Error::StaleResourceVersion {
                kind: kind.to_string(),
                name: meta.name.clone().unwrap_or_default(),
            })
        }
        _ => Ok(()),
    }
}

fn apply_labels(meta: &mut ObjectMeta, patch: &LabelPatch) {
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in patch {
        match value {
            Some(value) => {
                labels.insert(key.clone(), value.clone());
            }
            None => {
                labels.remove(key);
            }
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.check("list:Node")?;
        Ok(self.state.read().nodes.values().cloned().collect())
    }

    async fn patch_node_labels(&self, name: &str, labels: &LabelPatch) -> Result<()> {
        self.check(&format!("Node/{}", name))?;
        let mut state = self.state.write();
        let node = state.nodes.get_mut(name).ok_or_else(|| not_found("Node", name))?;
        apply_labels(&mut node.metadata, labels);
        self.bump_version(&mut node.metadata);
        self.updated();
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
        node_name: Option<&str>,
    ) -> Result<Vec<Pod>> {
        self.check("list:Pod")?;
        let state = self.state.read();
        Ok(state
            .pods
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |wanted| ns == wanted))
            .map(|(_, pod)| pod)
            .filter(|pod| {
                let empty = BTreeMap::new();
                selector_matches(label_selector, pod.metadata.labels.as_ref().unwrap_or(&empty))
            })
            .filter(|pod| {
                node_name.map_or(true, |wanted| {
                    pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(wanted)
                })
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.check(&format!("Pod/{}/{}", namespace, name))?;
        self.state
            .write()
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found("Pod", name))?;
        self.deleted();
        Ok(())
    }

    async fn list_node_identities(&self) -> Result<Vec<CsibmNode>> {
        self.check("list:CsibmNode")?;
        Ok(self.state.read().identities.values().cloned().collect())
    }

    async fn patch_node_identity_labels(&self, name: &str, labels: &LabelPatch) -> Result<()> {
        self.check(&format!("CsibmNode/{}", name))?;
        let mut state = self.state.write();
        let identity = state
            .identities
            .get_mut(name)
            .ok_or_else(|| not_found("CsibmNode", name))?;
        apply_labels(&mut identity.metadata, labels);
        self.bump_version(&mut identity.metadata);
        self.updated();
        Ok(())
    }

    async fn delete_node_identity(&self, name: &str) -> Result<()> {
        self.check(&format!("CsibmNode/{}", name))?;
        self.state
            .write()
            .identities
            .remove(name)
            .ok_or_else(|| not_found("CsibmNode", name))?;
        self.deleted();
        Ok(())
    }

    async fn list_dependents(&self, kind: DependentKind) -> Result<Vec<DependentRecord>> {
        self.check(&format!("list:{}", kind))?;
        Ok(self
            .state
            .read()
            .dependents
            .values()
            .filter(|d| d.record.reference.kind == kind)
            .map(|d| d.record.clone())
            .collect())
    }

    async fn get_dependent(&self, reference: &DependentRef) -> Result<Option<DependentRecord>> {
        self.check(&format!("get:{}", reference))?;
        Ok(self
            .state
            .read()
            .dependents
            .get(reference)
            .map(|d| d.record.clone()))
    }

    async fn clear_dependent_finalizers(&self, reference: &DependentRef) -> Result<()> {
        self.check(&reference.to_string())?;
        let mut state = self.state.write();
        let stored = state
            .dependents
            .get_mut(reference)
            .ok_or_else(|| not_found(&reference.kind.to_string(), &reference.name))?;
        stored.record.finalizers.clear();
        if stored.deletion_requested {
            state.dependents.remove(reference);
        }
        self.updated();
        Ok(())
    }

    async fn delete_dependent(&self, reference: &DependentRef) -> Result<()> {
        self.check(&reference.to_string())?;
        let mut state = self.state.write();
        let stored = state
            .dependents
            .get_mut(reference)
            .ok_or_else(|| not_found(&reference.kind.to_string(), &reference.name))?;
        if stored.record.finalizers.is_empty() {
            state.dependents.remove(reference);
        } else {
            stored.deletion_requested = true;
        }
        self.deleted();
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.check(&format!("get:ConfigMap/{}/{}", namespace, name))?;
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let key = namespaced_key(&config_map.metadata);
        self.check(&format!("ConfigMap/{}/{}", key.0, key.1))?;
        let mut state = self.state.write();
        if state.config_maps.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: "ConfigMap".into(),
                name: key.1,
            });
        }
        let mut stored = config_map.clone();
        self.stamp_new(&mut stored.metadata);
        state.config_maps.insert(key, stored);
        self.created();
        Ok(())
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let key = namespaced_key(&config_map.metadata);
        self.check(&format!("ConfigMap/{}/{}", key.0, key.1))?;
        let mut state = self.state.write();
        let existing = state
            .config_maps
            .get_mut(&key)
            .ok_or_else(|| not_found("ConfigMap", &key.1))?;
        let creation_timestamp = existing.metadata.creation_timestamp.clone();
        *existing = config_map.clone();
        existing.metadata.creation_timestamp = creation_timestamp;
        self.bump_version(&mut existing.metadata);
        self.updated();
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.check(&format!("ConfigMap/{}/{}", namespace, name))?;
        self.state
            .write()
            .config_maps
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found("ConfigMap", name))?;
        self.deleted();
        Ok(())
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        self.check(&format!("get:DaemonSet/{}/{}", namespace, name))?;
        Ok(self.daemon_set(namespace, name))
    }

    async fn create_daemon_set(&self, daemon_set: &DaemonSet) -> Result<()> {
        let key = namespaced_key(&daemon_set.metadata);
        self.check(&format!("DaemonSet/{}/{}", key.0, key.1))?;
        let mut state = self.state.write();
        if state.daemon_sets.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: "DaemonSet".into(),
                name: key.1,
            });
        }
        let mut stored = daemon_set.clone();
        self.stamp_new(&mut stored.metadata);
        state.daemon_sets.insert(key, stored);
        self.created();
        Ok(())
    }

    async fn replace_daemon_set(&self, daemon_set: &DaemonSet) -> Result<()> {
        let key = namespaced_key(&daemon_set.metadata);
        self.check(&format!("DaemonSet/{}/{}", key.0, key.1))?;
        let mut state = self.state.write();
        let existing = state
            .daemon_sets
            .get_mut(&key)
            .ok_or_else(|| not_found("DaemonSet", &key.1))?;
        let creation_timestamp = existing.metadata.creation_timestamp.clone();
        *existing = daemon_set.clone();
        existing.metadata.creation_timestamp = creation_timestamp;
        self.bump_version(&mut existing.metadata);
        self.updated();
        Ok(())
    }

    async fn delete_daemon_set(&self, namespace: &str, name: &str) -> Result<()> {
        self.check(&format!("DaemonSet/{}/{}", namespace, name))?;
        self.state
            .write()
            .daemon_sets
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found("DaemonSet", name))?;
        self.deleted();
        Ok(())
    }

    async fn get_openshift_scheduler(&self, name: &str) -> Result<Option<Scheduler>> {
        self.check(&format!("get:Scheduler/{}", name))?;
        Ok(self.scheduler(name))
    }

    async fn patch_openshift_scheduler_policy(
        &self,
        name: &str,
        policy: Option<&str>,
        resource_version: Option<&str>,
    ) -> Result<()> {
        self.check(&format!("Scheduler/{}", name))?;
        let mut state = self.state.write();
        let scheduler = state
            .schedulers
            .get_mut(name)
            .ok_or_else(|| not_found("Scheduler", name))?;
        check_version(&scheduler.metadata, resource_version, "Scheduler")?;
        scheduler.spec.policy = policy.map(|p| crate::crd::ConfigMapNameReference {
            name: p.to_string(),
        });
        self.bump_version(&mut scheduler.metadata);
        self.updated();
        Ok(())
    }

    async fn get_secondary_scheduler(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecondaryScheduler>> {
        self.check(&format!("get:SecondaryScheduler/{}/{}", namespace, name))?;
        Ok(self.secondary_scheduler(namespace, name))
    }

    async fn patch_secondary_scheduler_config(
        &self,
        namespace: &str,
        name: &str,
        config_map: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        self.check(&format!("SecondaryScheduler/{}/{}", namespace, name))?;
        let mut state = self.state.write();
        let scheduler = state
            .secondary_schedulers
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found("SecondaryScheduler", name))?;
        check_version(&scheduler.metadata, resource_version, "SecondaryScheduler")?;
        scheduler.spec.scheduler_config = config_map.to_string();
        self.bump_version(&mut scheduler.metadata);
        self.updated();
        Ok(())
    }

    async fn list_reservations(&self) -> Result<Vec<AvailableCapacityReservation>> {
        self.check("list:AvailableCapacityReservation")?;
        Ok(self.reservations())
    }

    async fn delete_reservation(&self, name: &str) -> Result<()> {
        self.check(&format!("AvailableCapacityReservation/{}", name))?;
        self.state
            .write()
            .reservations
            .remove(name)
            .ok_or_else(|| not_found("AvailableCapacityReservation", name))?;
        self.deleted();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn dependent(name: &str, finalizers: Vec<String>) -> DependentRecord {
        DependentRecord {
            reference: DependentRef {
                kind: DependentKind::Drive,
                name: name.into(),
                namespace: None,
            },
            node_id: "uuid-1".into(),
            finalizers,
        }
    }

    #[tokio::test]
    async fn test_delete_with_finalizers_waits_for_clear() {
        let store = MemoryStore::new();
        store.add_dependent(dependent("d1", vec!["protect".into()]));
        let reference = store.dependents()[0].reference.clone();

        store.delete_dependent(&reference).await.unwrap();
        assert_eq!(store.dependents().len(), 1);

        store.clear_dependent_finalizers(&reference).await.unwrap();
        assert!(store.dependents().is_empty());
    }

    #[tokio::test]
    async fn test_replace_preserves_creation_timestamp() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.set_now(t0);

        let cm = fixtures::config_map("ns", "cm", btreemap_data("a"));
        store.create_config_map(&cm).await.unwrap();

        store.set_now(t0 + chrono::Duration::hours(1));
        store
            .replace_config_map(&fixtures::config_map("ns", "cm", btreemap_data("b")))
            .await
            .unwrap();

        let stored = store.config_map("ns", "cm").unwrap();
        assert_eq!(stored.metadata.creation_timestamp, Some(Time(t0)));
        assert_eq!(stored.data.unwrap()["key"], "b");
        assert_eq!(store.mutations().creates, 1);
        assert_eq!(store.mutations().updates, 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.add_dependent(dependent("d1", vec![]));
        store.fail_on("Drive/d1");

        let reference = store.dependents()[0].reference.clone();
        assert_matches!(store.delete_dependent(&reference).await, Err(Error::Internal(_)));
        assert_eq!(store.mutations().total(), 0);
    }

    #[tokio::test]
    async fn test_list_pods_filters_by_selector_and_node() {
        let store = MemoryStore::new();
        store.add_pod(fixtures::running_pod("csi", "node-a", "app=csi-baremetal-node", "worker-1", None));
        store.add_pod(fixtures::running_pod("csi", "node-b", "app=csi-baremetal-node", "worker-2", None));
        store.add_pod(fixtures::running_pod("csi", "ctrl", "app=csi-baremetal-controller", "worker-1", None));

        let pods = store
            .list_pods(None, "app=csi-baremetal-node", Some("worker-1"))
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name.as_deref(), Some("node-a"));
    }

    fn btreemap_data(value: &str) -> BTreeMap<String, String> {
        maplit::btreemap! {"key".to_string() => value.to_string()}
    }
}
