//! Operator configuration
//!
//! Process-level settings assembled from the command line, and loading of a
//! Deployment from a local YAML file for standalone runs.

use crate::crd::{BaremetalDeployment, DeploymentSpec};
use crate::error::{Error, Result};
use crate::tasks::CleanupConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the desired state comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentSource {
    /// A `Deployment` custom resource in the cluster
    Resource { namespace: String, name: String },
    /// A YAML file holding a `Deployment` document or a bare spec
    File(PathBuf),
}

/// Settings for the running operator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub source: DeploymentSource,
    /// Namespace of the operator-owned ConfigMaps and DaemonSets
    pub namespace: String,
    pub reconcile_interval: Duration,
    pub pass_deadline: Duration,
    pub cleanup: CleanupConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            source: DeploymentSource::Resource {
                namespace: "default".to_string(),
                name: "csi-baremetal".to_string(),
            },
            namespace: "default".to_string(),
            reconcile_interval: Duration::from_secs(30),
            pass_deadline: Duration::from_secs(120),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(Error::Configuration("reconcile interval must be positive".into()));
        }
        if self.pass_deadline.is_zero() {
            return Err(Error::Configuration("pass deadline must be positive".into()));
        }
        if self.cleanup.interval.is_zero() {
            return Err(Error::Configuration("cleanup interval must be positive".into()));
        }
        if self.namespace.is_empty() {
            return Err(Error::Configuration("namespace must not be empty".into()));
        }
        Ok(())
    }
}

/// Read a deployment spec from YAML.
///
/// Accepts a full `Deployment` resource (with `apiVersion`, `kind`, `spec`)
/// or just the spec body.
pub fn load_deployment_file(path: &Path) -> Result<DeploymentSpec> {
    let raw = std::fs::read_to_string(path)?;
    parse_deployment(&raw)
}

pub fn parse_deployment(raw: &str) -> Result<DeploymentSpec> {
    let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
    let is_resource = value.get("kind").is_some() && value.get("spec").is_some();
    let spec = if is_resource {
        serde_yaml::from_value::<BaremetalDeployment>(value)?.spec
    } else {
        serde_yaml::from_value::<DeploymentSpec>(value)?
    };
    if spec.platform.is_empty() {
        return Err(Error::Configuration("deployment has no platform".into()));
    }
    Ok(spec)
}
