//! Scheduler Patch Coordinator
//!
//! Installs the csi-baremetal scheduler extender into the cluster scheduler
//! on vanilla Kubernetes, RKE2 and OpenShift, and tracks its adoption.

pub mod config;
pub mod coordinator;
pub mod extender;
pub mod openshift;
pub mod readiness;
pub mod upsert;
pub mod vanilla;

pub use config::{ClusterFlavor, HostPaths, OpenShiftTargets, PatchTarget, PatcherConfiguration, WatchedConfigMap};
pub use coordinator::{Clock, Readiness, SchedulerPatchCoordinator};
pub use extender::Extender;
pub use readiness::{ReadinessLedger, ReadinessStatus, ReadinessStatusList, STATUS_CONFIG_MAP, STATUS_KEY};
