//! Create-or-update helpers for owned objects
//!
//! Objects are written only when their desired content differs from what the
//! cluster holds, so a settled cluster sees no writes.

use crate::domain::ports::ResourceStore;
use crate::error::Result;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use tracing::info;

/// Annotation carrying the hash of the DaemonSet spec last written
pub const SPEC_HASH_ANNOTATION: &str = "csi-baremetal.dell.com/spec-hash";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "csi-baremetal-operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

fn key(namespace: &Option<String>, name: &Option<String>) -> (String, String) {
    (
        namespace.clone().unwrap_or_default(),
        name.clone().unwrap_or_default(),
    )
}

/// Create `desired`, or replace the stored ConfigMap when its data differs
pub async fn upsert_config_map(store: &dyn ResourceStore, desired: &ConfigMap) -> Result<Applied> {
    let (namespace, name) = key(&desired.metadata.namespace, &desired.metadata.name);

    match store.get_config_map(&namespace, &name).await? {
        None => {
            store.create_config_map(desired).await?;
            info!(namespace = %namespace, name = %name, "Created ConfigMap");
            Ok(Applied::Created)
        }
        Some(existing) if existing.data == desired.data => Ok(Applied::Unchanged),
        Some(existing) => {
            let mut updated = desired.clone();
            updated.metadata.resource_version = existing.metadata.resource_version;
            store.replace_config_map(&updated).await?;
            info!(namespace = %namespace, name = %name, "Updated ConfigMap");
            Ok(Applied::Updated)
        }
    }
}

/// SHA-256 of the JSON encoding, truncated to 16 hex chars. Persisted in an
/// annotation, so it must not depend on the toolchain.
pub fn spec_hash<T: serde::Serialize>(value: &T) -> Result<String> {
    let encoded = serde_json::to_vec(value)?;
    let digest = Sha256::digest(&encoded);
    Ok(digest[..8].iter().fold(String::with_capacity(16), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    }))
}

/// The parts of a DaemonSet this operator sets. The API server fills
/// defaults into everything else, so only these are compared with the
/// stored object.
fn owned_fields(daemon_set: &DaemonSet) -> serde_json::Value {
    let template = daemon_set.spec.as_ref().map(|s| &s.template);
    let pod = template.and_then(|t| t.spec.as_ref());

    let containers: Vec<_> = pod
        .map(|p| p.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|c| {
            let mounts: Vec<_> = c
                .volume_mounts
                .iter()
                .flatten()
                .map(|m| (&m.name, &m.mount_path))
                .collect();
            json!({
                "name": c.name,
                "image": c.image,
                "command": c.command,
                "args": c.args,
                "mounts": mounts,
            })
        })
        .collect();
    let volumes: Vec<_> = pod
        .and_then(|p| p.volumes.as_ref())
        .into_iter()
        .flatten()
        .map(|v| {
            json!({
                "name": v.name,
                "hostPath": v.host_path.as_ref().map(|h| &h.path),
                "configMap": v.config_map.as_ref().and_then(|c| c.name.as_ref()),
            })
        })
        .collect();

    json!({
        "selector": daemon_set.spec.as_ref().map(|s| &s.selector),
        "labels": template.and_then(|t| t.metadata.as_ref()).and_then(|m| m.labels.as_ref()),
        "containers": containers,
        "volumes": volumes,
        "tolerations": pod.and_then(|p| p.tolerations.as_ref()),
        "affinity": pod.and_then(|p| p.affinity.as_ref()),
    })
}

/// Create `desired`, or replace the stored DaemonSet when it no longer
/// matches: either the desired spec changed (hash annotation) or someone
/// edited the fields this operator owns.
pub async fn upsert_daemon_set(store: &dyn ResourceStore, desired: &DaemonSet) -> Result<Applied> {
    let (namespace, name) = key(&desired.metadata.namespace, &desired.metadata.name);

    let mut desired = desired.clone();
    let hash = spec_hash(&desired.spec)?;
    desired
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash.clone());

    match store.get_daemon_set(&namespace, &name).await? {
        None => {
            store.create_daemon_set(&desired).await?;
            info!(namespace = %namespace, name = %name, "Created DaemonSet");
            Ok(Applied::Created)
        }
        Some(existing) => {
            let current = existing
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(SPEC_HASH_ANNOTATION));
            let drifted = owned_fields(&existing) != owned_fields(&desired);
            if current == Some(&hash) && !drifted {
                return Ok(Applied::Unchanged);
            }
            if drifted {
                info!(namespace = %namespace, name = %name, "DaemonSet drifted from desired state");
            }
            desired.metadata.resource_version = existing.metadata.resource_version;
            store.replace_daemon_set(&desired).await?;
            info!(namespace = %namespace, name = %name, "Updated DaemonSet");
            Ok(Applied::Updated)
        }
    }
}
