//! OpenShift scheduler CRDs
//!
//! Only the fields the scheduler patch coordinator reads or writes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide scheduler configuration (`schedulers.config.openshift.io`)
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Scheduler",
    plural = "schedulers"
)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSpec {
    /// ConfigMap in openshift-config holding the scheduler policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ConfigMapNameReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_node_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masters_schedulable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigMapNameReference {
    #[serde(default)]
    pub name: String,
}

impl Scheduler {
    /// Name of the referenced policy ConfigMap, empty when unset
    pub fn policy_name(&self) -> &str {
        self.spec
            .policy
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or("")
    }
}

/// Secondary scheduler deployed by the secondary-scheduler operator
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "SecondaryScheduler",
    plural = "secondaryschedulers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecondarySchedulerSpec {
    /// ConfigMap holding the KubeSchedulerConfiguration
    #[serde(default)]
    pub scheduler_config: String,

    #[serde(default)]
    pub scheduler_image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}
