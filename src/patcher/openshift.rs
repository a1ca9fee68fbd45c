//! OpenShift scheduler flavor
//!
//! OpenShift regenerates its scheduler from cluster config objects, so the
//! extender is installed by writing a ConfigMap and pointing the scheduler
//! resource at it. The pointer field may belong to someone else; it is only
//! ever set when empty and only ever cleared when it names our ConfigMap.

use super::config::{OpenShiftTargets, PatcherConfiguration};
use super::extender::Extender;
use super::upsert::{upsert_config_map, Applied, MANAGED_BY, MANAGED_BY_LABEL};
use crate::crd::DeploymentSpec;
use crate::domain::ports::ResourceStore;
use crate::error::{ignore_not_found, AggregateError, Error, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

/// Ownership of the scheduler's pointer field
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pointer {
    Empty,
    Ours,
    Foreign(String),
}

fn classify_pointer(current: &str, ours: &str) -> Pointer {
    match current {
        "" => Pointer::Empty,
        c if c == ours => Pointer::Ours,
        c => Pointer::Foreign(c.to_string()),
    }
}

fn target_name(targets: &OpenShiftTargets) -> String {
    match &targets.resource_namespace {
        Some(ns) => format!("SecondaryScheduler/{}/{}", ns, targets.resource_name),
        None => format!("Scheduler/{}", targets.resource_name),
    }
}

fn config_map(spec: &DeploymentSpec, targets: &OpenShiftTargets) -> Result<ConfigMap> {
    let extender = Extender::new(spec.scheduler.extender_port);
    let document = match targets.resource_namespace {
        Some(_) => extender.secondary_scheduler_config(PatcherConfiguration::SECONDARY_SCHEDULER_NAME)?,
        None => extender.policy_json()?,
    };
    let mut data = BTreeMap::new();
    data.insert(targets.config_map_key.clone(), document);

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(targets.config_map_name.clone()),
            namespace: Some(targets.config_map_namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Pointer field as read, with the version it was read at
struct PointerRead {
    value: String,
    resource_version: Option<String>,
}

/// Current value of the pointer field on the target resource
async fn read_pointer(store: &dyn ResourceStore, targets: &OpenShiftTargets) -> Result<PointerRead> {
    let missing = || Error::ResourceNotFound {
        kind: match targets.resource_namespace {
            Some(_) => "SecondaryScheduler".to_string(),
            None => "Scheduler".to_string(),
        },
        name: targets.resource_name.clone(),
    };
    match &targets.resource_namespace {
        Some(ns) => store
            .get_secondary_scheduler(ns, &targets.resource_name)
            .await?
            .map(|s| PointerRead {
                value: s.spec.scheduler_config,
                resource_version: s.metadata.resource_version,
            })
            .ok_or_else(missing),
        None => store
            .get_openshift_scheduler(&targets.resource_name)
            .await?
            .map(|s| PointerRead {
                value: s.policy_name().to_string(),
                resource_version: s.metadata.resource_version,
            })
            .ok_or_else(missing),
    }
}

/// Write the pointer, failing if the resource changed since `read`
async fn write_pointer(
    store: &dyn ResourceStore,
    targets: &OpenShiftTargets,
    read: &PointerRead,
    value: Option<&str>,
) -> Result<()> {
    let version = read.resource_version.as_deref();
    match &targets.resource_namespace {
        Some(ns) => {
            store
                .patch_secondary_scheduler_config(
                    ns,
                    &targets.resource_name,
                    value.unwrap_or_default(),
                    version,
                )
                .await
        }
        None => {
            store
                .patch_openshift_scheduler_policy(&targets.resource_name, value, version)
                .await
        }
    }
}

/// Write the extender ConfigMap and point the scheduler at it
pub async fn patch(
    store: &dyn ResourceStore,
    spec: &DeploymentSpec,
    targets: &OpenShiftTargets,
) -> Result<bool> {
    let applied = upsert_config_map(store, &config_map(spec, targets)?).await?;

    let ours = targets.config_map_name.as_str();
    let read = read_pointer(store, targets).await?;
    let pointed = match classify_pointer(&read.value, ours) {
        Pointer::Ours => false,
        Pointer::Empty => {
            write_pointer(store, targets, &read, Some(ours)).await?;
            info!(target = %target_name(targets), config_map = %ours, "Pointed scheduler at extender config");
            true
        }
        Pointer::Foreign(current) => {
            return Err(Error::Conflict {
                target: target_name(targets),
                current,
                desired: ours.to_string(),
            })
        }
    };

    Ok(pointed || applied != Applied::Unchanged)
}

/// Release the scheduler pointer if it is ours and drop our ConfigMap
pub async fn unpatch(store: &dyn ResourceStore, targets: &OpenShiftTargets) -> Result<()> {
    let ours = targets.config_map_name.as_str();
    let mut errors = AggregateError::new();

    match read_pointer(store, targets).await {
        Ok(read) => match classify_pointer(&read.value, ours) {
            Pointer::Empty => {}
            Pointer::Ours => {
                if errors.capture(write_pointer(store, targets, &read, None).await).is_some() {
                    info!(target = %target_name(targets), "Released scheduler pointer");
                }
            }
            Pointer::Foreign(current) => errors.push(Error::Conflict {
                target: target_name(targets),
                current,
                desired: String::new(),
            }),
        },
        Err(e) if e.is_not_found() => {}
        Err(e) => errors.push(e),
    }

    errors.capture(ignore_not_found(
        store
            .delete_config_map(&targets.config_map_namespace, ours)
            .await,
    ));
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConfigMapNameReference, Scheduler, SchedulerSpec, SecondaryScheduler, SecondarySchedulerSpec};
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;

    fn spec(secondary: bool) -> DeploymentSpec {
        let mut spec = DeploymentSpec {
            platform: "openshift".into(),
            ..Default::default()
        };
        spec.scheduler.use_secondary_scheduler = secondary;
        spec
    }

    fn targets(secondary: bool) -> OpenShiftTargets {
        PatcherConfiguration::for_spec(&spec(secondary))
            .unwrap()
            .openshift_targets()
            .unwrap()
            .clone()
    }

    fn scheduler(policy: Option<&str>) -> Scheduler {
        Scheduler::new(
            "cluster",
            SchedulerSpec {
                policy: policy.map(|name| ConfigMapNameReference { name: name.into() }),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_patch_sets_empty_policy() {
        let store = MemoryStore::new();
        store.add_scheduler(scheduler(None));

        assert!(patch(&store, &spec(false), &targets(false)).await.unwrap());

        assert_eq!(store.scheduler("cluster").unwrap().policy_name(), "scheduler-policy");
        let cm = store.config_map("openshift-config", "scheduler-policy").unwrap();
        assert!(cm.data.unwrap().contains_key("policy.cfg"));

        let before = store.mutations();
        assert!(!patch(&store, &spec(false), &targets(false)).await.unwrap());
        assert_eq!(store.mutations().since(&before).total(), 0);
    }

    #[tokio::test]
    async fn test_foreign_policy_is_a_conflict() {
        let store = MemoryStore::new();
        store.add_scheduler(scheduler(Some("someone-else")));

        let err = patch(&store, &spec(false), &targets(false)).await.unwrap_err();

        assert_matches!(err, Error::Conflict { ref current, .. } if current == "someone-else");
        assert!(!err.is_retryable());
        assert_eq!(store.scheduler("cluster").unwrap().policy_name(), "someone-else");
    }

    #[tokio::test]
    async fn test_unpatch_leaves_foreign_policy() {
        let store = MemoryStore::new();
        store.add_scheduler(scheduler(Some("someone-else")));

        let err = unpatch(&store, &targets(false)).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.scheduler("cluster").unwrap().policy_name(), "someone-else");
    }

    #[tokio::test]
    async fn test_unpatch_clears_our_policy() {
        let store = MemoryStore::new();
        store.add_scheduler(scheduler(None));
        patch(&store, &spec(false), &targets(false)).await.unwrap();

        unpatch(&store, &targets(false)).await.unwrap();

        assert_eq!(store.scheduler("cluster").unwrap().policy_name(), "");
        assert!(store.config_map("openshift-config", "scheduler-policy").is_none());
    }

    #[tokio::test]
    async fn test_secondary_scheduler_flow() {
        let store = MemoryStore::new();
        let mut secondary = SecondaryScheduler::new("cluster", SecondarySchedulerSpec::default());
        secondary.metadata.namespace = Some("openshift-secondary-scheduler-operator".into());
        store.add_secondary_scheduler(secondary);

        patch(&store, &spec(true), &targets(true)).await.unwrap();

        let stored = store
            .secondary_scheduler("openshift-secondary-scheduler-operator", "cluster")
            .unwrap();
        assert_eq!(stored.spec.scheduler_config, "secondary-scheduler-config");
        assert!(store
            .config_map("openshift-secondary-scheduler-operator", "secondary-scheduler-config")
            .is_some());

        unpatch(&store, &targets(true)).await.unwrap();
        let stored = store
            .secondary_scheduler("openshift-secondary-scheduler-operator", "cluster")
            .unwrap();
        assert_eq!(stored.spec.scheduler_config, "");
    }

    #[tokio::test]
    async fn test_pointer_write_refuses_concurrent_change() {
        let store = MemoryStore::new();
        store.add_scheduler(scheduler(None));
        let targets = targets(false);

        let read = read_pointer(&store, &targets).await.unwrap();
        assert_eq!(read.value, "");
        store
            .patch_openshift_scheduler_policy("cluster", Some("someone-else"), None)
            .await
            .unwrap();

        let err = write_pointer(&store, &targets, &read, Some("scheduler-policy"))
            .await
            .unwrap_err();

        assert_matches!(err, Error::StaleResourceVersion { .. });
        assert!(err.is_retryable());
        assert_eq!(store.scheduler("cluster").unwrap().policy_name(), "someone-else");
    }

    #[tokio::test]
    async fn test_secondary_pointer_write_refuses_concurrent_change() {
        let store = MemoryStore::new();
        let mut secondary = SecondaryScheduler::new("cluster", SecondarySchedulerSpec::default());
        secondary.metadata.namespace = Some("openshift-secondary-scheduler-operator".into());
        store.add_secondary_scheduler(secondary);
        let targets = targets(true);

        let read = read_pointer(&store, &targets).await.unwrap();
        store
            .patch_secondary_scheduler_config(
                "openshift-secondary-scheduler-operator",
                "cluster",
                "someone-else",
                None,
            )
            .await
            .unwrap();

        let err = write_pointer(&store, &targets, &read, Some("secondary-scheduler-config"))
            .await
            .unwrap_err();

        assert_matches!(err, Error::StaleResourceVersion { .. });
        let stored = store
            .secondary_scheduler("openshift-secondary-scheduler-operator", "cluster")
            .unwrap();
        assert_eq!(stored.spec.scheduler_config, "someone-else");
    }

    #[tokio::test]
    async fn test_missing_scheduler_is_not_found() {
        let store = MemoryStore::new();
        let err = patch(&store, &spec(false), &targets(false)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
