//! Node removal cascade
//!
//! Tears down a node identity and the driver resources bound to it. The node
//! agent pod must be gone before anything is deleted; dependent resources of
//! all four kinds are then removed, and the identity itself goes last, only
//! when every dependent deletion succeeded. Nothing is rolled back.

use crate::crd::CsibmNode;
use crate::domain::ports::{DependentKind, DependentRef, ResourceStoreRef};
use crate::error::{ignore_not_found, AggregateError, Error, Result};
use tracing::{debug, info, warn};

/// Label selector of the per-node driver agent
pub const NODE_AGENT_SELECTOR: &str = "app=csi-baremetal-node";

pub struct NodeRemoval {
    store: ResourceStoreRef,
}

impl NodeRemoval {
    pub fn new(store: ResourceStoreRef) -> Self {
        Self { store }
    }

    /// Remove `identity` together with its dependent resources
    pub async fn remove(&self, identity: &CsibmNode) -> Result<()> {
        let name = identity.metadata.name.as_deref().unwrap_or_default();

        // Without a host the agent check cannot run, so nothing is deleted
        let hostname = identity.hostname().ok_or_else(|| Error::MissingHostname {
            identity: name.to_string(),
        })?;
        let agents = self
            .store
            .list_pods(None, NODE_AGENT_SELECTOR, Some(hostname))
            .await?;
        if !agents.is_empty() {
            return Err(Error::NodeAgentRunning {
                node: hostname.to_string(),
                identity: name.to_string(),
            });
        }

        let uuid = identity.uuid();
        if uuid.is_empty() {
            warn!(identity = %name, "Node identity has no UUID, skipping dependent cleanup");
        } else {
            let mut errors = AggregateError::new();
            for kind in DependentKind::ALL {
                errors.capture(self.delete_dependents(kind, uuid).await);
            }
            errors.into_result()?;
        }

        ignore_not_found(self.store.delete_node_identity(name).await)?;
        info!(identity = %name, uuid = %uuid, "Removed node identity");
        Ok(())
    }

    async fn delete_dependents(&self, kind: DependentKind, node_id: &str) -> Result<()> {
        let records = self.store.list_dependents(kind).await?;
        let mut errors = AggregateError::new();

        for record in records.into_iter().filter(|r| r.node_id == node_id) {
            let has_finalizers = !record.finalizers.is_empty();
            if errors
                .capture(self.delete_one(&record.reference, has_finalizers).await)
                .is_some()
            {
                debug!(resource = %record.reference, "Deleted dependent resource");
            }
        }

        errors.into_result()
    }

    async fn delete_one(&self, reference: &DependentRef, has_finalizers: bool) -> Result<()> {
        if has_finalizers {
            ignore_not_found(self.store.clear_dependent_finalizers(reference).await)?;
        }
        // Finalizer removal may already have let the object go
        match self.store.get_dependent(reference).await? {
            Some(_) => ignore_not_found(self.store.delete_dependent(reference).await),
            None => Ok(()),
        }
    }
}
