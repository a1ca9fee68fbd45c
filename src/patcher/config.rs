//! Patcher configuration per cluster flavor
//!
//! Everything the coordinator needs to know about where a flavor keeps its
//! scheduler: host paths the companion patcher edits, the scheduler pods to
//! watch, and the ConfigMap whose creation marks the start of a rollout.

use crate::crd::DeploymentSpec;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Cluster distributions the scheduler patch supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterFlavor {
    /// Stock Kubernetes with a static-pod scheduler
    Vanilla,
    /// RKE2
    Rke,
    /// OpenShift, scheduler managed through its config API
    OpenShift,
}

impl ClusterFlavor {
    pub const ALL: [ClusterFlavor; 3] = [
        ClusterFlavor::Vanilla,
        ClusterFlavor::Rke,
        ClusterFlavor::OpenShift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterFlavor::Vanilla => "vanilla",
            ClusterFlavor::Rke => "rke",
            ClusterFlavor::OpenShift => "openshift",
        }
    }
}

impl fmt::Display for ClusterFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterFlavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ClusterFlavor::ALL
            .into_iter()
            .find(|flavor| flavor.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("unsupported platform {:?}", s)))
    }
}

/// ConfigMap whose creation timestamp starts the readiness clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedConfigMap {
    /// The extender ConfigMap the operator writes in its own namespace
    Owned,
    /// A ConfigMap the flavor regenerates after the patch lands
    External { namespace: String, name: String },
}

/// Host paths for static-pod flavors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub manifests_dir: String,
    pub config_path: String,
    pub policy_path: String,
    pub kubeconfig: String,
}

impl HostPaths {
    /// Directory holding the scheduler config and policy files
    pub fn config_dir(&self) -> &str {
        self.config_path
            .rsplit_once('/')
            .map_or(self.config_path.as_str(), |(dir, _)| dir)
    }

    pub fn scheduler_manifest(&self) -> String {
        format!("{}/kube-scheduler.yaml", self.manifests_dir)
    }
}

/// OpenShift objects the patch writes or points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenShiftTargets {
    pub config_map_namespace: String,
    pub config_map_name: String,
    pub config_map_key: String,
    /// Name of the `Scheduler` or `SecondaryScheduler` object to patch
    pub resource_name: String,
    /// Set for the secondary scheduler, which is namespaced
    pub resource_namespace: Option<String>,
}

/// How the extender reaches the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchTarget {
    /// Companion DaemonSet editing static pod files on the host
    StaticPod(HostPaths),
    /// Scheduler config objects of OpenShift
    OpenShift(OpenShiftTargets),
}

/// Per-pass patch configuration derived from the deployment's platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatcherConfiguration {
    pub flavor: ClusterFlavor,
    pub target: PatchTarget,
    pub scheduler_namespace: String,
    pub scheduler_selector: String,
    pub watched: WatchedConfigMap,
}

impl PatcherConfiguration {
    pub const SECONDARY_SCHEDULER_NAMESPACE: &'static str = "openshift-secondary-scheduler-operator";
    pub const SECONDARY_SCHEDULER_NAME: &'static str = "secondary-scheduler";

    /// Configuration for a flavor, without the secondary scheduler override
    pub fn new(platform: &str) -> Result<Self> {
        let flavor: ClusterFlavor = platform.parse()?;
        Ok(match flavor {
            ClusterFlavor::Vanilla => Self {
                flavor,
                target: PatchTarget::StaticPod(HostPaths {
                    manifests_dir: "/etc/kubernetes/manifests".into(),
                    config_path: "/etc/kubernetes/scheduler/config.yaml".into(),
                    policy_path: "/etc/kubernetes/scheduler/policy.yaml".into(),
                    kubeconfig: "/etc/kubernetes/scheduler.conf".into(),
                }),
                scheduler_namespace: "kube-system".into(),
                scheduler_selector: "component=kube-scheduler".into(),
                watched: WatchedConfigMap::Owned,
            },
            ClusterFlavor::Rke => Self {
                flavor,
                target: PatchTarget::StaticPod(HostPaths {
                    manifests_dir: "/var/lib/rancher/rke2/agent/pod-manifests".into(),
                    config_path: "/var/lib/rancher/rke2/agent/scheduler/config.yaml".into(),
                    policy_path: "/var/lib/rancher/rke2/agent/scheduler/policy.yaml".into(),
                    kubeconfig: "/var/lib/rancher/rke2/server/cred/scheduler.kubeconfig".into(),
                }),
                scheduler_namespace: "kube-system".into(),
                scheduler_selector: "component=kube-scheduler".into(),
                watched: WatchedConfigMap::Owned,
            },
            ClusterFlavor::OpenShift => Self {
                flavor,
                target: PatchTarget::OpenShift(OpenShiftTargets {
                    config_map_namespace: "openshift-config".into(),
                    config_map_name: "scheduler-policy".into(),
                    config_map_key: "policy.cfg".into(),
                    resource_name: "cluster".into(),
                    resource_namespace: None,
                }),
                scheduler_namespace: "openshift-kube-scheduler".into(),
                scheduler_selector: "app=openshift-kube-scheduler".into(),
                watched: WatchedConfigMap::External {
                    namespace: "openshift-kube-scheduler".into(),
                    name: "config".into(),
                },
            },
        })
    }

    /// Configuration for a deployment, honoring `useSecondaryScheduler` on OpenShift
    pub fn for_spec(spec: &DeploymentSpec) -> Result<Self> {
        let mut config = Self::new(&spec.platform)?;
        if config.flavor == ClusterFlavor::OpenShift && spec.scheduler.use_secondary_scheduler {
            let namespace = Self::SECONDARY_SCHEDULER_NAMESPACE.to_string();
            config.target = PatchTarget::OpenShift(OpenShiftTargets {
                config_map_namespace: namespace.clone(),
                config_map_name: "secondary-scheduler-config".into(),
                config_map_key: "config.yaml".into(),
                resource_name: "cluster".into(),
                resource_namespace: Some(namespace.clone()),
            });
            config.scheduler_namespace = namespace.clone();
            config.scheduler_selector = format!("app={}", Self::SECONDARY_SCHEDULER_NAME);
            config.watched = WatchedConfigMap::External {
                namespace,
                name: "secondary-scheduler-config".into(),
            };
        }
        Ok(config)
    }

    pub fn uses_secondary_scheduler(&self) -> bool {
        matches!(&self.target, PatchTarget::OpenShift(t) if t.resource_namespace.is_some())
    }

    pub fn host_paths(&self) -> Option<&HostPaths> {
        match &self.target {
            PatchTarget::StaticPod(host) => Some(host),
            PatchTarget::OpenShift(_) => None,
        }
    }

    pub fn openshift_targets(&self) -> Option<&OpenShiftTargets> {
        match &self.target {
            PatchTarget::OpenShift(targets) => Some(targets),
            PatchTarget::StaticPod(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_every_flavor_has_a_configuration() {
        for flavor in ClusterFlavor::ALL {
            let config = PatcherConfiguration::new(flavor.as_str()).unwrap();
            assert_eq!(config.flavor, flavor);
            assert_eq!(
                config.host_paths().is_some(),
                flavor != ClusterFlavor::OpenShift
            );
        }
    }

    #[test]
    fn test_unknown_platform_fails_closed() {
        assert_matches!(PatcherConfiguration::new("mesos"), Err(Error::Configuration(_)));
        assert_matches!(PatcherConfiguration::new(""), Err(Error::Configuration(_)));
        assert_matches!(PatcherConfiguration::new("Vanilla"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_host_paths() {
        let config = PatcherConfiguration::new("vanilla").unwrap();
        let host = config.host_paths().unwrap();
        assert_eq!(host.config_dir(), "/etc/kubernetes/scheduler");
        assert_eq!(host.scheduler_manifest(), "/etc/kubernetes/manifests/kube-scheduler.yaml");
    }

    #[test]
    fn test_secondary_scheduler_override() {
        let mut spec = DeploymentSpec {
            platform: "openshift".into(),
            ..Default::default()
        };
        assert!(!PatcherConfiguration::for_spec(&spec).unwrap().uses_secondary_scheduler());

        spec.scheduler.use_secondary_scheduler = true;
        let config = PatcherConfiguration::for_spec(&spec).unwrap();
        assert!(config.uses_secondary_scheduler());
        assert_eq!(config.scheduler_namespace, "openshift-secondary-scheduler-operator");

        spec.platform = "vanilla".into();
        let config = PatcherConfiguration::for_spec(&spec).unwrap();
        assert!(!config.uses_secondary_scheduler());
        assert_eq!(config.watched, WatchedConfigMap::Owned);
    }
}
