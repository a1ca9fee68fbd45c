//! csi-baremetal driver CRDs
//!
//! Custom resources owned by the driver itself. The operator only reads,
//! labels, strips finalizers from and deletes them, so each spec carries just
//! the fields the operator relies on and the driver's on-the-wire names.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of every driver resource
pub const DRIVER_GROUP: &str = "csi-baremetal.dell.com";

/// Address key carrying the node hostname in [`CsibmNodeSpec::addresses`]
pub const HOSTNAME_ADDRESS: &str = "Hostname";

// =============================================================================
// Node identity
// =============================================================================

/// Durable identity of a node, created by the node agent. It outlives the
/// Kubernetes Node object it was registered for.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "Node",
    root = "CsibmNode",
    plural = "nodes",
    shortname = "csibmnode",
    printcolumn = r#"{"name": "UUID", "type": "string", "jsonPath": ".spec.UUID"}"#,
    printcolumn = r#"{"name": "Hostname", "type": "string", "jsonPath": ".spec.Addresses.Hostname"}"#
)]
pub struct CsibmNodeSpec {
    #[serde(rename = "UUID", default)]
    pub uuid: String,

    /// Addresses keyed by kind (Hostname, InternalIP)
    #[serde(rename = "Addresses", default)]
    pub addresses: BTreeMap<String, String>,
}

impl CsibmNode {
    /// Hostname the node agent registered with
    pub fn hostname(&self) -> Option<&str> {
        self.spec
            .addresses
            .get(HOSTNAME_ADDRESS)
            .map(String::as_str)
            .filter(|h| !h.is_empty())
    }

    pub fn uuid(&self) -> &str {
        &self.spec.uuid
    }
}

// =============================================================================
// Node-scoped driver resources
// =============================================================================

/// Physical drive discovered on a node
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "Drive",
    plural = "drives",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.NodeId"}"#,
    printcolumn = r#"{"name": "Health", "type": "string", "jsonPath": ".spec.Health"}"#
)]
pub struct DriveSpec {
    #[serde(rename = "UUID", default)]
    pub uuid: String,
    #[serde(rename = "NodeId", default)]
    pub node_id: String,
    #[serde(rename = "SerialNumber", default)]
    pub serial_number: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "Health", default)]
    pub health: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Usage", default)]
    pub usage: String,
}

/// Free capacity on a node available for volume placement
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "AvailableCapacity",
    plural = "availablecapacities",
    shortname = "ac"
)]
pub struct AvailableCapacitySpec {
    #[serde(rename = "Location", default)]
    pub location: String,
    #[serde(rename = "NodeId", default)]
    pub node_id: String,
    #[serde(rename = "StorageClass", default)]
    pub storage_class: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
}

/// LVM volume group spanning drives of one node
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "LogicalVolumeGroup",
    plural = "logicalvolumegroups",
    shortname = "lvg"
)]
pub struct LogicalVolumeGroupSpec {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Node", default)]
    pub node: String,
    #[serde(rename = "Locations", default)]
    pub locations: Vec<String>,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Provisioned volume
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "Volume",
    plural = "volumes",
    namespaced
)]
pub struct VolumeSpec {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "NodeId", default)]
    pub node_id: String,
    #[serde(rename = "Location", default)]
    pub location: String,
    #[serde(rename = "Size", default)]
    pub size: i64,
    #[serde(rename = "StorageClass", default)]
    pub storage_class: String,
    #[serde(rename = "CSIStatus", default)]
    pub csi_status: String,
}

/// Resources whose lifetime is bound to a node identity
pub trait NodeScoped {
    /// UUID of the owning node identity
    fn node_id(&self) -> &str;
}

impl NodeScoped for Drive {
    fn node_id(&self) -> &str {
        &self.spec.node_id
    }
}

impl NodeScoped for AvailableCapacity {
    fn node_id(&self) -> &str {
        &self.spec.node_id
    }
}

impl NodeScoped for LogicalVolumeGroup {
    fn node_id(&self) -> &str {
        &self.spec.node
    }
}

impl NodeScoped for Volume {
    fn node_id(&self) -> &str {
        &self.spec.node_id
    }
}

// =============================================================================
// Capacity reservations
// =============================================================================

/// Reservation of available capacity made by the scheduler extender
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "AvailableCapacityReservation",
    plural = "availablecapacityreservations",
    shortname = "acr"
)]
pub struct AvailableCapacityReservationSpec {
    #[serde(rename = "Namespace", default)]
    pub namespace: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Reservation state machine values written by the extender
pub mod reservation_status {
    pub const REQUESTED: &str = "REQUESTED";
    pub const RESERVED: &str = "RESERVED";
    pub const CONFIRMED: &str = "CONFIRMED";
    pub const REJECTED: &str = "REJECTED";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csibmnode_wire_format() {
        let json = serde_json::json!({
            "apiVersion": "csi-baremetal.dell.com/v1",
            "kind": "Node",
            "metadata": {"name": "csibmnode-1"},
            "spec": {
                "UUID": "6a1e6b2d",
                "Addresses": {"Hostname": "worker-1", "InternalIP": "10.0.0.1"}
            }
        });
        let node: CsibmNode = serde_json::from_value(json).unwrap();
        assert_eq!(node.uuid(), "6a1e6b2d");
        assert_eq!(node.hostname(), Some("worker-1"));
    }

    #[test]
    fn test_empty_hostname_is_absent() {
        let node = CsibmNode::new("n", CsibmNodeSpec::default());
        assert_eq!(node.hostname(), None);
    }

    #[test]
    fn test_lvg_node_field() {
        let lvg: LogicalVolumeGroupSpec =
            serde_json::from_value(serde_json::json!({"Node": "uuid-1", "Locations": ["d1"]})).unwrap();
        let lvg = LogicalVolumeGroup::new("lvg-1", lvg);
        assert_eq!(lvg.node_id(), "uuid-1");
    }
}
