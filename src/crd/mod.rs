//! Custom Resource Definitions used by the operator
//!
//! This module contains all CRD types:
//! - Deployment: desired state of the driver installation (read only)
//! - Node (csibmnode), Drive, AvailableCapacity, LogicalVolumeGroup, Volume,
//!   AvailableCapacityReservation: resources owned by the driver
//! - Scheduler, SecondaryScheduler: OpenShift scheduler configuration

pub mod deployment;
pub mod driver;
pub mod openshift;

pub use deployment::*;
pub use driver::*;
pub use openshift::*;
