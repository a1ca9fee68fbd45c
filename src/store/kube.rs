//! Kubernetes API Resource Store
//!
//! [`ResourceStore`] adapter backed by a `kube::Client`. Objects owned by
//! other controllers (nodes, driver CRs, OpenShift config) are only touched
//! through JSON merge patches so unknown fields survive the round trip.

use crate::crd::{
    AvailableCapacity, AvailableCapacityReservation, BaremetalDeployment, CsibmNode, Drive,
    LogicalVolumeGroup, NodeScoped, Scheduler, SecondaryScheduler, Volume,
};
use crate::domain::ports::{
    DependentKind, DependentRecord, DependentRef, LabelPatch, ResourceStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Resource store talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a store from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// The Deployment resource driving the reconcile loop
    pub async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<BaremetalDeployment>> {
        let api: Api<BaremetalDeployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    fn volumes(&self, reference: &DependentRef) -> Result<Api<Volume>> {
        let namespace = reference.namespace.as_deref().ok_or_else(|| {
            Error::Internal(format!("{} is namespaced but has no namespace", reference))
        })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

fn label_patch(labels: &LabelPatch) -> serde_json::Value {
    json!({ "metadata": { "labels": labels } })
}

/// Merge patch of `spec`, preconditioned on `resource_version` when given.
/// The API server answers 409 if the object changed in between.
fn guarded_patch(spec: serde_json::Value, resource_version: Option<&str>) -> serde_json::Value {
    match resource_version {
        Some(version) => json!({ "metadata": { "resourceVersion": version }, "spec": spec }),
        None => json!({ "spec": spec }),
    }
}

fn stale_on_conflict<T>(result: kube::Result<T>, kind: &str, name: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 409 => Err(Error::StaleResourceVersion {
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Namespace and name of an object we are about to write
fn object_key(meta: &ObjectMeta, kind: &str) -> Result<(String, String)> {
    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(Error::Internal(format!(
            "{} must carry both namespace and name",
            kind
        ))),
    }
}

fn record_of<K>(kind: DependentKind, obj: &K) -> DependentRecord
where
    K: Resource + NodeScoped,
{
    DependentRecord {
        reference: DependentRef {
            kind,
            name: obj.name_any(),
            namespace: obj.namespace(),
        },
        node_id: obj.node_id().to_string(),
        finalizers: obj.finalizers().to_vec(),
    }
}

async fn list_records<K>(api: Api<K>, kind: DependentKind) -> Result<Vec<DependentRecord>>
where
    K: Resource + NodeScoped + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(|obj| record_of(kind, obj)).collect())
}

async fn get_record<K>(api: Api<K>, kind: DependentKind, name: &str) -> Result<Option<DependentRecord>>
where
    K: Resource + NodeScoped + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?.map(|obj| record_of(kind, &obj)))
}

async fn clear_finalizers<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = json!({ "metadata": { "finalizers": null } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn delete_named<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_node_labels(&self, name: &str, labels: &LabelPatch) -> Result<()> {
        debug!(node = %name, ?labels, "Patching node labels");
        let api: Api<Node> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Merge(&label_patch(labels)))
            .await?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
        node_name: Option<&str>,
    ) -> Result<Vec<Pod>> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default().labels(label_selector);
        if let Some(node) = node_name {
            params = params.fields(&format!("spec.nodeName={}", node));
        }
        Ok(api.list(&params).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        delete_named(Api::<Pod>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn list_node_identities(&self) -> Result<Vec<CsibmNode>> {
        let api: Api<CsibmNode> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_node_identity_labels(&self, name: &str, labels: &LabelPatch) -> Result<()> {
        debug!(identity = %name, ?labels, "Patching node identity labels");
        let api: Api<CsibmNode> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Merge(&label_patch(labels)))
            .await?;
        Ok(())
    }

    async fn delete_node_identity(&self, name: &str) -> Result<()> {
        delete_named(Api::<CsibmNode>::all(self.client.clone()), name).await
    }

    async fn list_dependents(&self, kind: DependentKind) -> Result<Vec<DependentRecord>> {
        let client = self.client.clone();
        match kind {
            DependentKind::Drive => list_records(Api::<Drive>::all(client), kind).await,
            DependentKind::AvailableCapacity => {
                list_records(Api::<AvailableCapacity>::all(client), kind).await
            }
            DependentKind::LogicalVolumeGroup => {
                list_records(Api::<LogicalVolumeGroup>::all(client), kind).await
            }
            DependentKind::Volume => list_records(Api::<Volume>::all(client), kind).await,
        }
    }

    async fn get_dependent(&self, reference: &DependentRef) -> Result<Option<DependentRecord>> {
        let client = self.client.clone();
        let (kind, name) = (reference.kind, reference.name.as_str());
        match kind {
            DependentKind::Drive => get_record(Api::<Drive>::all(client), kind, name).await,
            DependentKind::AvailableCapacity => {
                get_record(Api::<AvailableCapacity>::all(client), kind, name).await
            }
            DependentKind::LogicalVolumeGroup => {
                get_record(Api::<LogicalVolumeGroup>::all(client), kind, name).await
            }
            DependentKind::Volume => get_record(self.volumes(reference)?, kind, name).await,
        }
    }

    async fn clear_dependent_finalizers(&self, reference: &DependentRef) -> Result<()> {
        let client = self.client.clone();
        let name = reference.name.as_str();
        match reference.kind {
            DependentKind::Drive => clear_finalizers(Api::<Drive>::all(client), name).await,
            DependentKind::AvailableCapacity => {
                clear_finalizers(Api::<AvailableCapacity>::all(client), name).await
            }
            DependentKind::LogicalVolumeGroup => {
                clear_finalizers(Api::<LogicalVolumeGroup>::all(client), name).await
            }
            DependentKind::Volume => clear_finalizers(self.volumes(reference)?, name).await,
        }
    }

    async fn delete_dependent(&self, reference: &DependentRef) -> Result<()> {
        let client = self.client.clone();
        let name = reference.name.as_str();
        match reference.kind {
            DependentKind::Drive => delete_named(Api::<Drive>::all(client), name).await,
            DependentKind::AvailableCapacity => {
                delete_named(Api::<AvailableCapacity>::all(client), name).await
            }
            DependentKind::LogicalVolumeGroup => {
                delete_named(Api::<LogicalVolumeGroup>::all(client), name).await
            }
            DependentKind::Volume => delete_named(self.volumes(reference)?, name).await,
        }
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let (namespace, _) = object_key(&config_map.metadata, "ConfigMap")?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let (namespace, name) = object_key(&config_map.metadata, "ConfigMap")?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        delete_named(Api::<ConfigMap>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_daemon_set(&self, daemon_set: &DaemonSet) -> Result<()> {
        let (namespace, _) = object_key(&daemon_set.metadata, "DaemonSet")?;
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), daemon_set).await?;
        Ok(())
    }

    async fn replace_daemon_set(&self, daemon_set: &DaemonSet) -> Result<()> {
        let (namespace, name) = object_key(&daemon_set.metadata, "DaemonSet")?;
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), daemon_set).await?;
        Ok(())
    }

    async fn delete_daemon_set(&self, namespace: &str, name: &str) -> Result<()> {
        delete_named(Api::<DaemonSet>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_openshift_scheduler(&self, name: &str) -> Result<Option<Scheduler>> {
        let api: Api<Scheduler> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_openshift_scheduler_policy(
        &self,
        name: &str,
        policy: Option<&str>,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let spec = match policy {
            Some(policy) => json!({ "policy": { "name": policy } }),
            None => json!({ "policy": null }),
        };
        let api: Api<Scheduler> = Api::all(self.client.clone());
        let result = api
            .patch(name, &PatchParams::default(), &Patch::Merge(&guarded_patch(spec, resource_version)))
            .await;
        stale_on_conflict(result, "Scheduler", name)
    }

    async fn get_secondary_scheduler(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecondaryScheduler>> {
        let api: Api<SecondaryScheduler> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_secondary_scheduler_config(
        &self,
        namespace: &str,
        name: &str,
        config_map: &str,
        resource_version: Option<&str>,
    ) -> Result<()> {
        let spec = json!({ "schedulerConfig": config_map });
        let api: Api<SecondaryScheduler> = Api::namespaced(self.client.clone(), namespace);
        let result = api
            .patch(name, &PatchParams::default(), &Patch::Merge(&guarded_patch(spec, resource_version)))
            .await;
        stale_on_conflict(result, "SecondaryScheduler", name)
    }

    async fn list_reservations(&self) -> Result<Vec<AvailableCapacityReservation>> {
        let api: Api<AvailableCapacityReservation> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_reservation(&self, name: &str) -> Result<()> {
        delete_named(
            Api::<AvailableCapacityReservation>::all(self.client.clone()),
            name,
        )
        .await
    }
}
