//! Kernel Classifier
//!
//! Maps every observed cluster node to a catalog platform by its kernel
//! version and keeps the platform label on the node in sync. The outcome also
//! tells the caller which node workload variants may be deployed: a platform
//! counts only once every node selected for it carries the label.

use super::catalog::PlatformCatalog;
use super::kernel::KernelVersion;
use crate::crd::NodeSelector;
use crate::domain::ports::{LabelPatch, ResourceStoreRef};
use crate::error::{AggregateError, Result};
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Node label carrying the platform tag
pub const PLATFORM_LABEL: &str = "nodes.csi-baremetal.dell.com/platform";

// =============================================================================
// Classification Outcome
// =============================================================================

/// Platform chosen for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformAssignment {
    pub platform: String,
    pub label_tag: String,
}

/// Result of classifying a batch of nodes
#[derive(Debug, Default)]
pub struct ClassificationOutcome {
    /// Node name to the platform it belongs to
    pub labels: BTreeMap<String, PlatformAssignment>,
    /// Platform key to whether every node of that platform is labeled
    pub platforms: BTreeMap<String, bool>,
    /// Per-node parse and label write failures
    pub errors: AggregateError,
}

impl ClassificationOutcome {
    /// Platforms whose node workload variant may be deployed
    pub fn ready_platforms(&self) -> impl Iterator<Item = &str> {
        self.platforms
            .iter()
            .filter(|(_, ready)| **ready)
            .map(|(key, _)| key.as_str())
    }

    pub fn label_of(&self, node: &str) -> Option<&str> {
        self.labels.get(node).map(|a| a.label_tag.as_str())
    }
}

// =============================================================================
// Classifier
// =============================================================================

pub struct KernelClassifier {
    catalog: Arc<PlatformCatalog>,
    store: ResourceStoreRef,
}

impl KernelClassifier {
    pub fn new(catalog: Arc<PlatformCatalog>, store: ResourceStoreRef) -> Self {
        Self { catalog, store }
    }

    pub fn catalog(&self) -> &PlatformCatalog {
        &self.catalog
    }

    /// Classify nodes without touching the cluster.
    ///
    /// Nodes whose kernel version cannot be parsed get no assignment and do
    /// not contribute to the platform set.
    pub fn classify(&self, nodes: &[Node]) -> ClassificationOutcome {
        let mut outcome = ClassificationOutcome::default();

        for node in nodes {
            let name = node_name(node);
            let version = match KernelVersion::parse(kernel_version(node)) {
                Ok(version) => version,
                Err(e) => {
                    warn!(node = %name, error = %e, "Skipping node with unparsable kernel version");
                    outcome.errors.push(e);
                    continue;
                }
            };

            let descriptor = self.catalog.select(&version);
            debug!(node = %name, kernel = %version, platform = descriptor.key(), "Classified node");

            outcome
                .platforms
                .entry(descriptor.key().to_string())
                .or_insert(true);
            outcome.labels.insert(
                name.to_string(),
                PlatformAssignment {
                    platform: descriptor.key().to_string(),
                    label_tag: descriptor.label_tag().to_string(),
                },
            );
        }

        outcome
    }

    /// Classify and write the platform label on every node that lacks the
    /// expected value. A failed write marks the node's platform as not ready.
    pub async fn apply(&self, nodes: &[Node]) -> ClassificationOutcome {
        let mut outcome = self.classify(nodes);

        for node in nodes {
            let name = node_name(node);
            let Some(assignment) = outcome.labels.get(name) else {
                continue;
            };
            if current_label(node) == Some(assignment.label_tag.as_str()) {
                continue;
            }

            let mut patch = LabelPatch::new();
            patch.insert(PLATFORM_LABEL.to_string(), Some(assignment.label_tag.clone()));
            match self.store.patch_node_labels(name, &patch).await {
                Ok(()) => {
                    info!(node = %name, platform = %assignment.label_tag, "Labeled node");
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "Failed to write platform label");
                    let platform = assignment.platform.clone();
                    outcome.platforms.insert(platform, false);
                    outcome.errors.push(e);
                }
            }
        }

        outcome
    }

    /// Remove the platform label from every node carrying it
    pub async fn clean(&self, nodes: &[Node]) -> Result<()> {
        let mut errors = AggregateError::new();

        for node in nodes.iter().filter(|n| current_label(n).is_some()) {
            let name = node_name(node);
            let mut patch = LabelPatch::new();
            patch.insert(PLATFORM_LABEL.to_string(), None);
            if errors
                .capture(self.store.patch_node_labels(name, &patch).await)
                .is_some()
            {
                info!(node = %name, "Removed platform label");
            }
        }

        errors.into_result()
    }
}

/// Keep only the nodes matching the deployment's node selector
pub fn filter_nodes(nodes: Vec<Node>, selector: Option<&NodeSelector>) -> Vec<Node> {
    match selector {
        None => nodes,
        Some(selector) => nodes
            .into_iter()
            .filter(|node| {
                node.metadata
                    .labels
                    .as_ref()
                    .map_or(false, |labels| selector.matches(labels))
            })
            .collect(),
    }
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn kernel_version(node: &Node) -> &str {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kernel_version.as_str())
        .unwrap_or_default()
}

fn current_label(node: &Node) -> Option<&str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(PLATFORM_LABEL))
        .map(String::as_str)
}
