//! Main Orchestrator - The reconcile pass
//!
//! Runs one pass over the cluster for a deployment:
//! - Kernel classification and platform labels
//! - Node workload deployment per fully labeled platform
//! - Node lifecycle transitions and removals
//! - Security verification and scheduler extender patching
//!
//! The pass is bounded by a deadline. Failures of one step do not stop the
//! following steps; everything is reported together at the end.

use crate::crd::DeploymentSpec;
use crate::domain::ports::{NodeWorkloadDeployerRef, ResourceStoreRef, SecurityVerifierRef};
use crate::error::{AggregateError, Error, Result};
use crate::lifecycle::NodeLifecycleReconciler;
use crate::metrics;
use crate::patcher::{Clock, SchedulerPatchCoordinator};
use crate::platform::{filter_nodes, KernelClassifier, PlatformCatalog, DEFAULT_PLATFORM};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Namespace holding the operator-owned ConfigMaps and DaemonSets
    pub namespace: String,
    /// Upper bound on a single reconcile pass
    pub deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            deadline: Duration::from_secs(120),
        }
    }
}

// =============================================================================
// Pass Summary
// =============================================================================

/// What the last completed pass did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassSummary {
    pub labeled_nodes: usize,
    pub ready_platforms: Vec<String>,
    pub identities_labeled: usize,
    pub identities_unlabeled: usize,
    pub identities_removed: usize,
    pub pods_evicted: usize,
}

/// Orchestrator status summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub healthy: bool,
    pub passes: u64,
    pub last_pass: Option<DateTime<Utc>>,
    pub last_summary: PassSummary,
    pub last_error: Option<String>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives the classifier, the lifecycle reconciler and the patch coordinator
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: ResourceStoreRef,
    classifier: KernelClassifier,
    lifecycle: NodeLifecycleReconciler,
    patcher: SchedulerPatchCoordinator,
    verifier: SecurityVerifierRef,
    deployer: NodeWorkloadDeployerRef,
    status: RwLock<OrchestratorStatus>,
    /// Last spec reconciled, kept until its extender is torn down
    last_spec: Mutex<Option<DeploymentSpec>>,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<PlatformCatalog>,
        store: ResourceStoreRef,
        verifier: SecurityVerifierRef,
        deployer: NodeWorkloadDeployerRef,
    ) -> Arc<Self> {
        Arc::new(Self::build(config, catalog, store, verifier, deployer, None))
    }

    /// Same as [`Orchestrator::new`] with an injected clock for the readiness timeout
    pub fn with_clock(
        config: OrchestratorConfig,
        catalog: Arc<PlatformCatalog>,
        store: ResourceStoreRef,
        verifier: SecurityVerifierRef,
        deployer: NodeWorkloadDeployerRef,
        clock: Clock,
    ) -> Arc<Self> {
        Arc::new(Self::build(config, catalog, store, verifier, deployer, Some(clock)))
    }

    fn build(
        config: OrchestratorConfig,
        catalog: Arc<PlatformCatalog>,
        store: ResourceStoreRef,
        verifier: SecurityVerifierRef,
        deployer: NodeWorkloadDeployerRef,
        clock: Option<Clock>,
    ) -> Self {
        let mut patcher = SchedulerPatchCoordinator::new(store.clone(), config.namespace.clone());
        if let Some(clock) = clock {
            patcher = patcher.with_clock(clock);
        }
        Self {
            classifier: KernelClassifier::new(catalog, store.clone()),
            lifecycle: NodeLifecycleReconciler::new(store.clone()),
            patcher,
            verifier,
            deployer,
            store,
            config,
            status: RwLock::new(OrchestratorStatus::default()),
            last_spec: Mutex::new(None),
        }
    }

    /// Run one reconcile pass within the configured deadline
    pub async fn reconcile(&self, spec: &DeploymentSpec) -> Result<()> {
        let started = Instant::now();
        let deadline = self.config.deadline;

        let result = match tokio::time::timeout(deadline, self.run_pass(spec)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(deadline)),
        };
        metrics::RECONCILE_DURATION.observe(started.elapsed().as_secs_f64());

        let mut status = self.status.write().await;
        status.passes += 1;
        status.last_pass = Some(Utc::now());
        match result {
            Ok(summary) => {
                metrics::RECONCILE_PASSES.with_label_values(&["success"]).inc();
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    removed = summary.identities_removed,
                    "Reconcile pass complete"
                );
                status.healthy = true;
                status.last_summary = summary;
                status.last_error = None;
                Ok(())
            }
            Err(e) => {
                metrics::RECONCILE_PASSES.with_label_values(&["error"]).inc();
                warn!(error = %e, retryable = e.is_retryable(), "Reconcile pass finished with errors");
                status.healthy = false;
                status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_pass(&self, spec: &DeploymentSpec) -> Result<PassSummary> {
        let mut errors = AggregateError::new();
        let mut summary = PassSummary::default();

        let nodes = self.store.list_nodes().await?;
        debug!(nodes = nodes.len(), "Listed cluster nodes");

        // Platform labels and node workloads
        if spec.platform_labels {
            let selected = filter_nodes(nodes.clone(), spec.node_selector.as_ref());
            let outcome = self.classifier.apply(&selected).await;
            summary.labeled_nodes = outcome.labels.len();

            for platform in outcome.ready_platforms() {
                let Some(descriptor) = self.classifier.catalog().get(platform) else {
                    continue;
                };
                let deployed = self
                    .deployer
                    .deploy(descriptor.label_tag(), &descriptor.workload_name(), spec)
                    .await;
                if errors.capture(deployed).is_some() {
                    summary.ready_platforms.push(platform.to_string());
                }
            }
            count_errors("classifier", outcome.errors.len());
            errors.push(Error::Aggregate(outcome.errors));
        } else {
            let cleaned = self.classifier.clean(&nodes).await;
            if let Err(e) = &cleaned {
                count_errors("classifier", 1);
                warn!(error = %e, "Failed to remove platform labels");
            }
            errors.capture(cleaned);
            if let Some(descriptor) = self.classifier.catalog().get(DEFAULT_PLATFORM) {
                errors.capture(
                    self.deployer
                        .deploy(descriptor.label_tag(), &descriptor.workload_name(), spec)
                        .await,
                );
            }
        }

        // Node lifecycle
        let report = self.lifecycle.reconcile(&nodes).await;
        summary.identities_labeled = report.labeled.len();
        summary.identities_unlabeled = report.unlabeled.len();
        summary.identities_removed = report.removed.len();
        summary.pods_evicted = report.evicted;
        count_errors("lifecycle", report.errors.len());
        errors.push(Error::Aggregate(report.errors));

        // Scheduler extender, only with a positive security verdict
        match self.verifier.verify(spec).await {
            Ok(()) => {
                if let Err(e) = self.patcher.reconcile(spec).await {
                    count_errors("patcher", 1);
                    errors.push(e);
                }
            }
            Err(e) => {
                warn!(error = %e, "Security verification failed, scheduler patching skipped");
                count_errors("security", 1);
                errors.push(e);
            }
        }

        errors.into_result().map(|_| summary)
    }

    /// Follow the desired state: reconcile while a deployment exists, tear
    /// the extender down once it is gone. A failed teardown is retried on
    /// the next call.
    pub async fn sync(&self, desired: Option<DeploymentSpec>) -> Result<()> {
        let mut last = self.last_spec.lock().await;
        match desired {
            Some(spec) => {
                let result = self.reconcile(&spec).await;
                *last = Some(spec);
                result
            }
            None => {
                let Some(spec) = last.as_ref() else {
                    debug!("No deployment, nothing to do");
                    return Ok(());
                };
                info!("Deployment removed, tearing down scheduler extender");
                self.teardown(spec).await?;
                *last = None;
                Ok(())
            }
        }
    }

    /// Remove the scheduler extender, e.g. when the deployment is deleted
    pub async fn teardown(&self, spec: &DeploymentSpec) -> Result<()> {
        self.patcher.unpatch(spec).await
    }

    pub async fn status(&self) -> OrchestratorStatus {
        self.status.read().await.clone()
    }
}

fn count_errors(component: &str, count: usize) {
    if count > 0 {
        metrics::RECONCILE_ERRORS
            .with_label_values(&[component])
            .inc_by(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::adapters::{RecordingDeployer, StaticVerifier};
    use crate::lifecycle::DRAIN_KEY;
    use crate::patcher::vanilla::PATCHER_DAEMON_SET;
    use crate::platform::PLATFORM_LABEL;
    use crate::store::{fixtures, MemoryStore};
    use assert_matches::assert_matches;

    struct Fixture {
        store: Arc<MemoryStore>,
        deployer: Arc<RecordingDeployer>,
        orchestrator: Arc<Orchestrator>,
    }

    fn fixture(verdict: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let deployer = Arc::new(RecordingDeployer::new());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                namespace: "csi".into(),
                ..Default::default()
            },
            Arc::new(PlatformCatalog::standard()),
            store.clone(),
            Arc::new(StaticVerifier::new(verdict)),
            deployer.clone(),
        );
        Fixture {
            store,
            deployer,
            orchestrator,
        }
    }

    fn vanilla_spec() -> DeploymentSpec {
        let mut spec = DeploymentSpec {
            platform: "vanilla".into(),
            ..Default::default()
        };
        spec.scheduler.patcher.enable = true;
        spec
    }

    #[tokio::test]
    async fn test_full_pass() {
        let f = fixture(true);
        f.store.add_node(fixtures::node("old", "4.15"));
        f.store.add_node(fixtures::node("new", "5.4.0-66-generic"));
        f.store.add_identity(fixtures::identity_with_label(
            "id-gone", "uuid-gone", "gone", DRAIN_KEY, "drain",
        ));

        f.orchestrator.reconcile(&vanilla_spec()).await.unwrap();

        let mut deployed = f.deployer.deployed();
        deployed.sort();
        assert_eq!(
            deployed,
            vec![
                ("default".to_string(), "csi-baremetal-node".to_string()),
                ("kernel-5.4".to_string(), "csi-baremetal-node-kernel-5.4".to_string()),
            ]
        );
        assert!(f.store.identity("id-gone").is_none());
        assert!(f.store.daemon_set("csi", PATCHER_DAEMON_SET).is_some());

        let status = f.orchestrator.status().await;
        assert!(status.healthy);
        assert_eq!(status.last_summary.labeled_nodes, 2);
        assert_eq!(status.last_summary.identities_removed, 1);
    }

    #[tokio::test]
    async fn test_failed_verification_skips_patch_only() {
        let f = fixture(false);
        f.store.add_node(fixtures::node("n1", "5.10"));

        let err = f.orchestrator.reconcile(&vanilla_spec()).await.unwrap_err();

        assert_matches!(err, Error::SecurityVerification(_));
        assert!(f.store.daemon_set("csi", PATCHER_DAEMON_SET).is_none());
        let labels = f.store.node("n1").unwrap().metadata.labels.unwrap();
        assert_eq!(labels[PLATFORM_LABEL], "kernel-5.4");
        assert!(!f.orchestrator.status().await.healthy);
    }

    #[tokio::test]
    async fn test_label_failure_withholds_platform_workload() {
        let f = fixture(true);
        f.store.add_node(fixtures::node("a", "5.4"));
        f.store.add_node(fixtures::node("b", "3.10"));
        f.store.fail_on("Node/a");

        let err = f.orchestrator.reconcile(&vanilla_spec()).await.unwrap_err();

        assert!(err.is_retryable());
        let platforms: Vec<_> = f.deployer.deployed().into_iter().map(|(p, _)| p).collect();
        assert_eq!(platforms, vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn test_disabled_platform_labels_cleans_nodes() {
        let f = fixture(true);
        f.store.add_node(fixtures::with_labels(
            fixtures::node("a", "5.4"),
            &[(PLATFORM_LABEL, "kernel-5.4")],
        ));
        let mut spec = vanilla_spec();
        spec.platform_labels = false;

        f.orchestrator.reconcile(&spec).await.unwrap();

        let labels = f.store.node("a").unwrap().metadata.labels.unwrap_or_default();
        assert!(!labels.contains_key(PLATFORM_LABEL));
        assert_eq!(f.deployer.deployed().len(), 1);
    }

    #[tokio::test]
    async fn test_node_list_failure_aborts_pass() {
        let f = fixture(true);
        f.store.fail_on("list:Node");

        assert!(f.orchestrator.reconcile(&vanilla_spec()).await.is_err());
        assert_eq!(f.store.mutations().total(), 0);
    }

    #[tokio::test]
    async fn test_failed_teardown_is_retried() {
        let f = fixture(true);
        f.orchestrator.sync(Some(vanilla_spec())).await.unwrap();
        f.store.fail_on(format!("DaemonSet/csi/{}", PATCHER_DAEMON_SET));

        assert!(f.orchestrator.sync(None).await.is_err());
        assert!(f.store.daemon_set("csi", PATCHER_DAEMON_SET).is_some());

        f.store.clear_failures();
        f.orchestrator.sync(None).await.unwrap();
        assert!(f.store.daemon_set("csi", PATCHER_DAEMON_SET).is_none());
        assert!(f.store.config_map("csi", "schedulerpatcher-config").is_none());

        let before = f.store.mutations();
        f.orchestrator.sync(None).await.unwrap();
        assert_eq!(f.store.mutations().since(&before).total(), 0);
    }

    #[tokio::test]
    async fn test_teardown_removes_extender() {
        let f = fixture(true);
        let spec = vanilla_spec();
        f.orchestrator.reconcile(&spec).await.unwrap();

        f.orchestrator.teardown(&spec).await.unwrap();

        assert!(f.store.daemon_set("csi", PATCHER_DAEMON_SET).is_none());
    }
}
