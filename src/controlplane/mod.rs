//! Control Plane Module
//!
//! The reconcile pass and the adapters plugged into its ports.

pub mod adapters;
pub mod orchestrator;

pub use adapters::{RecordingDeployer, StaticVerifier};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorStatus, PassSummary};
