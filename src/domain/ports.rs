//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the reconcile logic and the
//! cluster. Adapters in [`crate::store`] implement them against the
//! Kubernetes API or an in-memory model.

use crate::crd::{
    AvailableCapacityReservation, CsibmNode, DeploymentSpec, Scheduler, SecondaryScheduler,
};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Dependent Resources
// =============================================================================

/// The four driver resource kinds bound to a node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependentKind {
    Drive,
    AvailableCapacity,
    LogicalVolumeGroup,
    Volume,
}

impl DependentKind {
    /// Every kind, in deletion order
    pub const ALL: [DependentKind; 4] = [
        DependentKind::Drive,
        DependentKind::AvailableCapacity,
        DependentKind::LogicalVolumeGroup,
        DependentKind::Volume,
    ];
}

impl std::fmt::Display for DependentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependentKind::Drive => write!(f, "Drive"),
            DependentKind::AvailableCapacity => write!(f, "AvailableCapacity"),
            DependentKind::LogicalVolumeGroup => write!(f, "LogicalVolumeGroup"),
            DependentKind::Volume => write!(f, "Volume"),
        }
    }
}

/// Address of one dependent resource instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependentRef {
    pub kind: DependentKind,
    pub name: String,
    /// Set only for namespaced kinds (Volume)
    pub namespace: Option<String>,
}

impl std::fmt::Display for DependentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Kind-agnostic view of a dependent resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentRecord {
    pub reference: DependentRef,
    /// UUID of the owning node identity
    pub node_id: String,
    pub finalizers: Vec<String>,
}

/// Label changes for a merge patch; `None` removes the key
pub type LabelPatch = BTreeMap<String, Option<String>>;

// =============================================================================
// Resource Store Port
// =============================================================================

/// Port for every read and write the operator performs against the cluster
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // Cluster nodes
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn patch_node_labels(&self, name: &str, labels: &LabelPatch) -> Result<()>;

    // Pods
    /// List pods matching an equality label selector, optionally pinned to a node.
    /// `namespace = None` lists across all namespaces.
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
        node_name: Option<&str>,
    ) -> Result<Vec<Pod>>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    // Node identities
    async fn list_node_identities(&self) -> Result<Vec<CsibmNode>>;
    async fn patch_node_identity_labels(&self, name: &str, labels: &LabelPatch) -> Result<()>;
    async fn delete_node_identity(&self, name: &str) -> Result<()>;

    // Dependent resources
    async fn list_dependents(&self, kind: DependentKind) -> Result<Vec<DependentRecord>>;
    async fn get_dependent(&self, reference: &DependentRef) -> Result<Option<DependentRecord>>;
    async fn clear_dependent_finalizers(&self, reference: &DependentRef) -> Result<()>;
    async fn delete_dependent(&self, reference: &DependentRef) -> Result<()>;

    // ConfigMaps
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<()>;
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    // DaemonSets
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>>;
    async fn create_daemon_set(&self, daemon_set: &DaemonSet) -> Result<()>;
    async fn replace_daemon_set(&self, daemon_set: &DaemonSet) -> Result<()>;
    async fn delete_daemon_set(&self, namespace: &str, name: &str) -> Result<()>;

    // OpenShift scheduler configuration
    async fn get_openshift_scheduler(&self, name: &str) -> Result<Option<Scheduler>>;
    /// Set `spec.policy.name`; `None` clears the reference. With a
    /// `resource_version` the write fails with `StaleResourceVersion` when the
    /// object changed since it was read.
    async fn patch_openshift_scheduler_policy(
        &self,
        name: &str,
        policy: Option<&str>,
        resource_version: Option<&str>,
    ) -> Result<()>;
    async fn get_secondary_scheduler(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecondaryScheduler>>;
    async fn patch_secondary_scheduler_config(
        &self,
        namespace: &str,
        name: &str,
        config_map: &str,
        resource_version: Option<&str>,
    ) -> Result<()>;

    // Capacity reservations
    async fn list_reservations(&self) -> Result<Vec<AvailableCapacityReservation>>;
    async fn delete_reservation(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Security Verifier Port
// =============================================================================

/// Port for RBAC verification of the workloads the operator deploys
#[async_trait]
pub trait SecurityVerifier: Send + Sync {
    /// `Ok(())` when the scheduler extender's service account may run privileged
    async fn verify(&self, spec: &DeploymentSpec) -> Result<()>;
}

// =============================================================================
// Node Workload Port
// =============================================================================

/// Port for the node workload template builder
#[async_trait]
pub trait NodeWorkloadDeployer: Send + Sync {
    /// Deploy the node agent variant for one kernel platform
    async fn deploy(&self, platform_tag: &str, workload_name: &str, spec: &DeploymentSpec)
        -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ResourceStoreRef = Arc<dyn ResourceStore>;
pub type SecurityVerifierRef = Arc<dyn SecurityVerifier>;
pub type NodeWorkloadDeployerRef = Arc<dyn NodeWorkloadDeployer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependent_kind_display() {
        assert_eq!(format!("{}", DependentKind::Drive), "Drive");
        assert_eq!(format!("{}", DependentKind::LogicalVolumeGroup), "LogicalVolumeGroup");
    }

    #[test]
    fn test_dependent_ref_display() {
        let cluster_scoped = DependentRef {
            kind: DependentKind::AvailableCapacity,
            name: "ac-1".into(),
            namespace: None,
        };
        assert_eq!(cluster_scoped.to_string(), "AvailableCapacity/ac-1");

        let namespaced = DependentRef {
            kind: DependentKind::Volume,
            name: "pvc-1".into(),
            namespace: Some("default".into()),
        };
        assert_eq!(namespaced.to_string(), "Volume/default/pvc-1");
    }
}
