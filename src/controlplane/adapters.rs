//! Port Adapters
//!
//! Security verification and node workload templating live outside this
//! operator. These adapters plug a fixed verdict and a recording deployer
//! into the orchestrator.

use crate::crd::DeploymentSpec;
use crate::domain::ports::{NodeWorkloadDeployer, SecurityVerifier};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

/// Verifier returning a verdict decided at startup
#[derive(Debug, Clone)]
pub struct StaticVerifier {
    verdict: bool,
}

impl StaticVerifier {
    pub fn new(verdict: bool) -> Self {
        Self { verdict }
    }
}

#[async_trait]
impl SecurityVerifier for StaticVerifier {
    async fn verify(&self, spec: &DeploymentSpec) -> Result<()> {
        if self.verdict {
            return Ok(());
        }
        Err(Error::SecurityVerification(format!(
            "scheduler extender on {:?} is not permitted to run privileged",
            spec.platform
        )))
    }
}

/// Deployer that logs and remembers every requested node workload
#[derive(Debug, Default)]
pub struct RecordingDeployer {
    deployed: RwLock<Vec<(String, String)>>,
}

impl RecordingDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(platform_tag, workload_name)` pairs, oldest first
    pub fn deployed(&self) -> Vec<(String, String)> {
        self.deployed.read().clone()
    }
}

#[async_trait]
impl NodeWorkloadDeployer for RecordingDeployer {
    async fn deploy(&self, platform_tag: &str, workload_name: &str, spec: &DeploymentSpec) -> Result<()> {
        info!(
            platform = %platform_tag,
            workload = %workload_name,
            node_id_from_annotation = spec.node_id_from_annotation,
            "Node workload requested"
        );
        self.deployed
            .write()
            .push((platform_tag.to_string(), workload_name.to_string()));
        Ok(())
    }
}
