//! Bare-metal CSI Operator - Control Core
//!
//! Operator logic for the bare-metal CSI driver on Kubernetes, RKE2 and
//! OpenShift clusters.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Reconcile Orchestrator                              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────────┐  ┌─────────────────────────┐  │
//! │  │ Kernel Platform │  │   Node Lifecycle    │  │  Scheduler Patch        │  │
//! │  │   Classifier    │  │ (taints, removal)   │  │  Coordinator            │  │
//! │  └────────┬────────┘  └──────────┬──────────┘  └────────────┬────────────┘  │
//! │           └──────────────────────┼──────────────────────────┘               │
//! │                      ┌───────────┴───────────┐                              │
//! │                      │    ResourceStore      │                              │
//! │                      │  (kube / in-memory)   │                              │
//! │                      └───────────────────────┘                              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                Background: capacity reservation cleanup                      │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`platform`]: Kernel version parsing, platform catalog and node labeling
//! - [`lifecycle`]: Node drain/maintenance state machine and cascade removal
//! - [`patcher`]: Scheduler extender patching per cluster flavor
//! - [`controlplane`]: The reconcile pass tying the above together
//! - [`store`]: Kubernetes and in-memory resource stores
//! - [`crd`]: Custom Resource Definitions
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod patcher;
pub mod platform;
pub mod store;
pub mod tasks;

// Re-export commonly used types
pub use config::{load_deployment_file, DeploymentSource, OperatorConfig};

pub use controlplane::{
    Orchestrator, OrchestratorConfig, OrchestratorStatus, PassSummary,
    RecordingDeployer, StaticVerifier,
};

pub use crd::{BaremetalDeployment, CsibmNode, DeploymentSpec};

pub use domain::ports::{
    NodeWorkloadDeployer, ResourceStore, SecurityVerifier,
    NodeWorkloadDeployerRef, ResourceStoreRef, SecurityVerifierRef,
};

pub use error::{Error, ErrorAction, Result};

pub use lifecycle::{NodeLifecycleReconciler, NodeState};

pub use patcher::{ClusterFlavor, PatcherConfiguration, SchedulerPatchCoordinator};

pub use platform::{KernelClassifier, KernelVersion, PlatformCatalog, PlatformDescriptor};

pub use store::{KubeStore, MemoryStore};

pub use tasks::{CleanupConfig, ReservationCleaner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
