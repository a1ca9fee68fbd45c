//! Object builders shared by the unit tests

use crate::crd::{CsibmNode, CsibmNodeSpec, HOSTNAME_ADDRESS};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus,
    Node, NodeSpec, NodeStatus, NodeSystemInfo, Pod, PodSpec, PodStatus, Taint,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::BTreeMap;

fn parse_labels(selector: &str) -> BTreeMap<String, String> {
    selector
        .split(',')
        .filter_map(|term| term.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn node(name: &str, kernel: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            node_info: Some(NodeSystemInfo {
                kernel_version: kernel.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

pub fn with_labels(mut node: Node, labels: &[(&str, &str)]) -> Node {
    let map = node.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in labels {
        map.insert(k.to_string(), v.to_string());
    }
    node
}

pub fn with_taint(mut node: Node, key: &str, value: &str, effect: &str) -> Node {
    let spec = node.spec.get_or_insert_with(NodeSpec::default);
    spec.taints.get_or_insert_with(Vec::new).push(Taint {
        key: key.to_string(),
        value: Some(value.to_string()),
        effect: effect.to_string(),
        time_added: None,
    });
    node
}

pub fn identity(name: &str, uuid: &str, hostname: &str) -> CsibmNode {
    let mut addresses = BTreeMap::new();
    addresses.insert(HOSTNAME_ADDRESS.to_string(), hostname.to_string());
    addresses.insert("InternalIP".to_string(), "10.0.0.1".to_string());
    CsibmNode::new(
        name,
        CsibmNodeSpec {
            uuid: uuid.to_string(),
            addresses,
        },
    )
}

pub fn identity_with_label(name: &str, uuid: &str, hostname: &str, key: &str, value: &str) -> CsibmNode {
    let mut identity = identity(name, uuid, hostname);
    identity
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    identity
}

/// Pod scheduled on `node_name`; `started` = None leaves the container waiting
pub fn running_pod(
    namespace: &str,
    name: &str,
    labels: &str,
    node_name: &str,
    started: Option<DateTime<Utc>>,
) -> Pod {
    let state = match started {
        Some(at) => ContainerState {
            running: Some(ContainerStateRunning {
                started_at: Some(Time(at)),
            }),
            ..Default::default()
        },
        None => ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ContainerCreating".to_string()),
                message: None,
            }),
            ..Default::default()
        },
    };
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(parse_labels(labels)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "kube-scheduler".to_string(),
                state: Some(state),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub fn config_map(namespace: &str, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

pub fn config_map_created_at(namespace: &str, name: &str, at: DateTime<Utc>) -> ConfigMap {
    let mut cm = config_map(namespace, name, BTreeMap::new());
    cm.metadata.creation_timestamp = Some(Time(at));
    cm
}
