//! Deployment CRD
//!
//! Desired state of a csi-baremetal installation. The operator reads it on
//! every pass and never writes to it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Deployment CRD
// =============================================================================

/// Deployment describes how the bare-metal CSI driver should be rolled out
/// on this cluster and which cluster flavor it runs on.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "csi-baremetal.dell.com",
    version = "v1",
    kind = "Deployment",
    root = "BaremetalDeployment",
    plural = "deployments",
    shortname = "csibmdeploy",
    printcolumn = r#"{"name": "Platform", "type": "string", "jsonPath": ".spec.platform"}"#,
    printcolumn = r#"{"name": "Patcher", "type": "boolean", "jsonPath": ".spec.scheduler.patcher.enable"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Cluster flavor: vanilla, rke or openshift
    #[serde(default)]
    pub platform: String,

    /// Registry prefix for every image the operator deploys
    #[serde(default)]
    pub global_registry: Option<String>,

    /// Restricts the nodes the driver is deployed on
    #[serde(default)]
    pub node_selector: Option<NodeSelector>,

    /// Read node identities from a node annotation instead of generating them
    #[serde(default, rename = "nodeIDFromAnnotation")]
    pub node_id_from_annotation: bool,

    /// Maintain the kernel platform label on nodes
    #[serde(default = "default_true")]
    pub platform_labels: bool,

    /// Scheduler extender settings
    #[serde(default)]
    pub scheduler: SchedulerExtenderSpec,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Single key/value node selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeSelector {
    pub key: String,
    pub value: String,
}

/// Scheduler extender settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerExtenderSpec {
    /// Port the extender listens on (host network)
    #[serde(default = "default_extender_port")]
    pub extender_port: u16,

    /// On OpenShift, route through the secondary scheduler instead of the policy API
    #[serde(default)]
    pub use_secondary_scheduler: bool,

    /// Scheduler patcher settings
    #[serde(default)]
    pub patcher: PatcherSpec,
}

/// Scheduler patcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatcherSpec {
    #[serde(default)]
    pub enable: bool,

    /// Seconds between on-disk config checks in the companion daemon
    #[serde(default = "default_patcher_interval")]
    pub interval: u64,

    /// Restore the original scheduler config when the companion daemon stops
    #[serde(default)]
    pub restore_on_shutdown: bool,

    #[serde(default = "default_config_map_name")]
    pub config_map_name: String,

    /// Minutes to wait for scheduler pods to pick up the patch before retrying
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout: u64,

    #[serde(default)]
    pub image: ImageSpec,
}

/// Container image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageSpec {
    #[serde(default = "default_patcher_image")]
    pub name: String,
    #[serde(default = "default_image_tag")]
    pub tag: String,
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_extender_port() -> u16 {
    8889
}

fn default_patcher_interval() -> u64 {
    60
}

fn default_config_map_name() -> String {
    "schedulerpatcher-config".to_string()
}

fn default_readiness_timeout() -> u64 {
    5
}

fn default_patcher_image() -> String {
    "csi-baremetal-scheduler-patcher".to_string()
}

fn default_image_tag() -> String {
    "green".to_string()
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            platform: String::new(),
            global_registry: None,
            node_selector: None,
            node_id_from_annotation: false,
            platform_labels: default_true(),
            scheduler: SchedulerExtenderSpec::default(),
        }
    }
}

impl Default for SchedulerExtenderSpec {
    fn default() -> Self {
        Self {
            extender_port: default_extender_port(),
            use_secondary_scheduler: false,
            patcher: PatcherSpec::default(),
        }
    }
}

impl Default for PatcherSpec {
    fn default() -> Self {
        Self {
            enable: false,
            interval: default_patcher_interval(),
            restore_on_shutdown: false,
            config_map_name: default_config_map_name(),
            readiness_timeout: default_readiness_timeout(),
            image: ImageSpec::default(),
        }
    }
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            name: default_patcher_image(),
            tag: default_image_tag(),
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl DeploymentSpec {
    /// Fully qualified image reference, honouring the global registry
    pub fn image_ref(&self, image: &ImageSpec) -> String {
        match self.global_registry.as_deref() {
            Some(registry) if !registry.is_empty() => {
                format!("{}/{}:{}", registry.trim_end_matches('/'), image.name, image.tag)
            }
            _ => format!("{}:{}", image.name, image.tag),
        }
    }
}

impl NodeSelector {
    /// Whether a label map satisfies this selector
    pub fn matches(&self, labels: &std::collections::BTreeMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}
