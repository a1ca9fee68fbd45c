//! Static-pod scheduler flavors (vanilla, RKE2)
//!
//! The extender documents go into a ConfigMap in the operator namespace. A
//! companion DaemonSet on every control-plane node copies them onto the host
//! and rewrites the kube-scheduler static pod manifest to load them.

use super::config::HostPaths;
use super::extender::Extender;
use super::upsert::{upsert_config_map, upsert_daemon_set, Applied, MANAGED_BY, MANAGED_BY_LABEL};
use crate::crd::DeploymentSpec;
use crate::domain::ports::ResourceStore;
use crate::error::{ignore_not_found, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, HostPathVolumeSource, NodeAffinity,
    NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec, PodTemplateSpec,
    Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;
use tracing::info;

pub const PATCHER_DAEMON_SET: &str = "schedulerpatcher";

const CONFIG_MOUNT: &str = "/config";
const CONTROL_PLANE_ROLES: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

fn labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), PATCHER_DAEMON_SET.to_string());
    labels.insert("app.kubernetes.io/name".to_string(), "csi-baremetal".to_string());
    labels.insert("app.kubernetes.io/component".to_string(), PATCHER_DAEMON_SET.to_string());
    labels
}

fn owned_meta(namespace: &str, name: &str) -> ObjectMeta {
    let mut labels = labels();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Extender ConfigMap read by the patcher pods
pub fn config_map(spec: &DeploymentSpec, namespace: &str, host: &HostPaths) -> Result<ConfigMap> {
    let extender = Extender::new(spec.scheduler.extender_port);
    Ok(ConfigMap {
        metadata: owned_meta(namespace, &spec.scheduler.patcher.config_map_name),
        data: Some(extender.static_pod_data(&host.kubeconfig)?),
        ..Default::default()
    })
}

fn host_volume(name: &str, path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                type_: Some("Directory".to_string()),
            }),
            ..Default::default()
        },
        VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        },
    )
}

fn tolerations() -> Vec<Toleration> {
    CONTROL_PLANE_ROLES
        .iter()
        .map(|key| Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        })
        .collect()
}

/// Control-plane nodes only; the terms are ORed
fn control_plane_affinity() -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: CONTROL_PLANE_ROLES
                    .iter()
                    .map(|key| NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: key.to_string(),
                            operator: "Exists".to_string(),
                            values: None,
                        }]),
                        ..Default::default()
                    })
                    .collect(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn patcher_args(spec: &DeploymentSpec, host: &HostPaths, platform: &str) -> Vec<String> {
    let patcher = &spec.scheduler.patcher;
    vec![
        format!("--platform={}", platform),
        format!("--manifest={}", host.scheduler_manifest()),
        format!("--source-policy-path={}/{}", CONFIG_MOUNT, super::extender::POLICY_KEY),
        format!("--source-config-path={}/{}", CONFIG_MOUNT, super::extender::CONFIG_KEY),
        format!("--source-config-23-path={}/{}", CONFIG_MOUNT, super::extender::CONFIG_23_KEY),
        format!("--source-config-25-path={}/{}", CONFIG_MOUNT, super::extender::CONFIG_25_KEY),
        format!("--target-policy-path={}", host.policy_path),
        format!("--target-config-path={}", host.config_path),
        format!("--interval={}", patcher.interval),
        format!("--restore={}", patcher.restore_on_shutdown),
    ]
}

/// Companion DaemonSet patching the static scheduler manifest
pub fn daemon_set(spec: &DeploymentSpec, namespace: &str, host: &HostPaths, platform: &str) -> DaemonSet {
    let patcher = &spec.scheduler.patcher;

    let config_volume = Volume {
        name: "schedulerpatcher-config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(patcher.config_map_name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let config_mount = VolumeMount {
        name: config_volume.name.clone(),
        mount_path: CONFIG_MOUNT.to_string(),
        read_only: Some(true),
        ..Default::default()
    };
    let (manifests_volume, manifests_mount) = host_volume("kubernetes-manifests", &host.manifests_dir);
    let (scheduler_volume, scheduler_mount) = host_volume("kubernetes-scheduler", host.config_dir());

    DaemonSet {
        metadata: owned_meta(namespace, PATCHER_DAEMON_SET),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(
                    [("app".to_string(), PATCHER_DAEMON_SET.to_string())].into_iter().collect(),
                ),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: PATCHER_DAEMON_SET.to_string(),
                        image: Some(spec.image_ref(&patcher.image)),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        command: Some(vec!["python3".to_string(), "-u".to_string(), "main.py".to_string()]),
                        args: Some(patcher_args(spec, host, platform)),
                        volume_mounts: Some(vec![config_mount, manifests_mount, scheduler_mount]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![config_volume, manifests_volume, scheduler_volume]),
                    tolerations: Some(tolerations()),
                    affinity: Some(control_plane_affinity()),
                    termination_grace_period_seconds: Some(10),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Install the extender: ConfigMap first, then the DaemonSet consuming it
pub async fn patch(
    store: &dyn ResourceStore,
    spec: &DeploymentSpec,
    namespace: &str,
    host: &HostPaths,
    platform: &str,
) -> Result<bool> {
    let cm = upsert_config_map(store, &config_map(spec, namespace, host)?).await?;
    let ds = upsert_daemon_set(store, &daemon_set(spec, namespace, host, platform)).await?;
    Ok(cm != Applied::Unchanged || ds != Applied::Unchanged)
}

/// Remove the DaemonSet, then its ConfigMap
pub async fn unpatch(store: &dyn ResourceStore, spec: &DeploymentSpec, namespace: &str) -> Result<()> {
    ignore_not_found(store.delete_daemon_set(namespace, PATCHER_DAEMON_SET).await)?;
    ignore_not_found(
        store
            .delete_config_map(namespace, &spec.scheduler.patcher.config_map_name)
            .await,
    )?;
    info!(namespace = %namespace, "Removed scheduler patcher");
    Ok(())
}
