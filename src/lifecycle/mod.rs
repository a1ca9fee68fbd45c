//! Node Lifecycle Reconciler
//!
//! Drains, labels and tears down per-node driver state when a cluster node is
//! removed or taken down for maintenance.

pub mod maintenance;
pub mod reconciler;
pub mod removal;
pub mod state;

pub use maintenance::{MaintenanceEvictor, DRIVER_POD_SELECTOR};
pub use reconciler::{LifecycleReport, NodeLifecycleReconciler};
pub use removal::{NodeRemoval, NODE_AGENT_SELECTOR};
pub use state::{NodeState, DRAIN_KEY, MAINTENANCE_VALUE, REMOVAL_VALUE};
