//! Node lifecycle states
//!
//! A node identity is driven through at most one transition per pass. The
//! transition is derived from three observations: whether a live cluster node
//! matches the identity, whether that node carries the removal taint, and
//! whether the identity carries the removal label.

use crate::crd::CsibmNode;
use k8s_openapi::api::core::v1::Node;

/// Key shared by the removal and maintenance taints and the removal label
pub const DRAIN_KEY: &str = "node.csi-baremetal.dell.com/drain";

/// Taint/label value requesting node removal
pub const REMOVAL_VALUE: &str = "drain";

/// Taint value requesting eviction of driver pods for planned downtime
pub const MAINTENANCE_VALUE: &str = "planned-downtime";

pub const TAINT_EFFECT_NO_SCHEDULE: &str = "NoSchedule";

/// What a reconcile pass must do with one node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Nothing to do
    Stable,
    /// Node is tainted for removal; mirror it onto the identity
    NeedsLabel,
    /// Taint was withdrawn; drop the label from the identity
    NeedsUnlabel,
    /// Node is gone and the identity was marked; tear everything down
    NeedsRemoval,
}

impl NodeState {
    pub fn compute(has_node: bool, has_taint: bool, has_label: bool) -> Self {
        match (has_node, has_taint, has_label) {
            (false, _, true) => NodeState::NeedsRemoval,
            (true, true, false) => NodeState::NeedsLabel,
            (true, false, true) => NodeState::NeedsUnlabel,
            _ => NodeState::Stable,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Stable => write!(f, "Stable"),
            NodeState::NeedsLabel => write!(f, "NeedsLabel"),
            NodeState::NeedsUnlabel => write!(f, "NeedsUnlabel"),
            NodeState::NeedsRemoval => write!(f, "NeedsRemoval"),
        }
    }
}

fn has_drain_taint(node: &Node, value: &str) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map_or(false, |taints| {
            taints.iter().any(|t| {
                t.key == DRAIN_KEY
                    && t.value.as_deref() == Some(value)
                    && t.effect == TAINT_EFFECT_NO_SCHEDULE
            })
        })
}

pub fn has_removal_taint(node: &Node) -> bool {
    has_drain_taint(node, REMOVAL_VALUE)
}

pub fn has_maintenance_taint(node: &Node) -> bool {
    has_drain_taint(node, MAINTENANCE_VALUE)
}

pub fn has_removal_label(identity: &CsibmNode) -> bool {
    identity
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(DRAIN_KEY))
        .map_or(false, |v| v == REMOVAL_VALUE)
}
