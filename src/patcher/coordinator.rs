//! Scheduler Patch Coordinator
//!
//! Installs the csi-baremetal scheduler extender for the deployment's cluster
//! flavor, records which schedulers picked it up, and reinstalls it when a
//! scheduler has not restarted within the readiness timeout.
//!
//! Order within a pass: extender ConfigMap, patch workload or pointer,
//! readiness ledger, retry decision.

use super::config::{PatchTarget, PatcherConfiguration, WatchedConfigMap};
use super::openshift;
use super::readiness::{ReadinessLedger, ReadinessStatusList};
use super::vanilla;
use crate::crd::DeploymentSpec;
use crate::domain::ports::ResourceStoreRef;
use crate::error::Result;
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What the readiness check concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Watched ConfigMap does not exist yet; nothing to measure against
    NotStarted,
    /// Every observed scheduler restarted after the epoch
    Ready(ReadinessStatusList),
    /// Some schedulers still run the old configuration
    Pending {
        statuses: ReadinessStatusList,
        epoch: DateTime<Utc>,
    },
}

/// Readiness timeout in minutes as a duration; `None` when it is too large
/// to represent, which never expires
fn readiness_timeout(minutes: u64) -> Option<Duration> {
    i64::try_from(minutes).ok().and_then(Duration::try_minutes)
}

pub struct SchedulerPatchCoordinator {
    store: ResourceStoreRef,
    namespace: String,
    clock: Clock,
}

impl SchedulerPatchCoordinator {
    /// Coordinator writing owned objects into `namespace`
    pub fn new(store: ResourceStoreRef, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the configuration, or `None` when patching is off for this spec
    fn gate(&self, spec: &DeploymentSpec) -> Option<PatcherConfiguration> {
        if !spec.scheduler.patcher.enable {
            debug!("Scheduler patcher disabled");
            return None;
        }
        match PatcherConfiguration::for_spec(spec) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(platform = %spec.platform, error = %e, "Scheduler patching skipped");
                None
            }
        }
    }

    /// Install the extender
    pub async fn patch(&self, spec: &DeploymentSpec) -> Result<()> {
        match self.gate(spec) {
            Some(config) => self.patch_with(&config, spec).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Remove the extender
    pub async fn unpatch(&self, spec: &DeploymentSpec) -> Result<()> {
        match self.gate(spec) {
            Some(config) => self.unpatch_with(&config, spec).await,
            None => Ok(()),
        }
    }

    /// Patch, update the readiness ledger and retry a stalled rollout
    pub async fn reconcile(&self, spec: &DeploymentSpec) -> Result<()> {
        let Some(config) = self.gate(spec) else {
            return Ok(());
        };

        if self.patch_with(&config, spec).await? {
            info!(platform = %config.flavor, "Scheduler extender configuration applied");
        }

        if let Readiness::Pending { statuses, epoch } = self.readiness(&config, spec).await? {
            let age = (self.clock)() - epoch;
            let expired = readiness_timeout(spec.scheduler.patcher.readiness_timeout)
                .map_or(false, |timeout| age > timeout);
            if expired {
                warn!(
                    pending = statuses.pending(),
                    age_secs = age.num_seconds(),
                    "Schedulers did not restart in time, reinstalling the extender"
                );
                metrics::PATCHER_RETRIES.inc();
                self.unpatch_with(&config, spec).await?;
                self.patch_with(&config, spec).await?;
            } else {
                debug!(pending = statuses.pending(), "Waiting for schedulers to restart");
            }
        }

        Ok(())
    }

    async fn patch_with(&self, config: &PatcherConfiguration, spec: &DeploymentSpec) -> Result<bool> {
        let store = self.store.as_ref();
        match &config.target {
            PatchTarget::StaticPod(host) => {
                vanilla::patch(store, spec, &self.namespace, host, config.flavor.as_str()).await
            }
            PatchTarget::OpenShift(targets) => openshift::patch(store, spec, targets).await,
        }
    }

    async fn unpatch_with(&self, config: &PatcherConfiguration, spec: &DeploymentSpec) -> Result<()> {
        let store = self.store.as_ref();
        match &config.target {
            PatchTarget::StaticPod(_) => vanilla::unpatch(store, spec, &self.namespace).await,
            PatchTarget::OpenShift(targets) => openshift::unpatch(store, targets).await,
        }
    }

    /// Compare scheduler start times with the watched ConfigMap and record
    /// the result in the ledger
    pub async fn readiness(&self, config: &PatcherConfiguration, spec: &DeploymentSpec) -> Result<Readiness> {
        let (namespace, name) = match &config.watched {
            WatchedConfigMap::Owned => (
                self.namespace.as_str(),
                spec.scheduler.patcher.config_map_name.as_str(),
            ),
            WatchedConfigMap::External { namespace, name } => (namespace.as_str(), name.as_str()),
        };

        let epoch = self
            .store
            .get_config_map(namespace, name)
            .await?
            .and_then(|cm| cm.metadata.creation_timestamp)
            .map(|t| t.0);
        let Some(epoch) = epoch else {
            debug!(namespace = %namespace, name = %name, "Watched ConfigMap not found");
            return Ok(Readiness::NotStarted);
        };

        let pods = self
            .store
            .list_pods(Some(&config.scheduler_namespace), &config.scheduler_selector, None)
            .await?;
        let statuses = ReadinessStatusList::from_pods(&pods, epoch);

        ReadinessLedger::new(self.store.as_ref(), &self.namespace)
            .write(&statuses)
            .await?;
        metrics::SCHEDULERS_PENDING.set(statuses.pending() as i64);

        if statuses.all_restarted() {
            Ok(Readiness::Ready(statuses))
        } else {
            Ok(Readiness::Pending { statuses, epoch })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConfigMapNameReference, Scheduler, SchedulerSpec};
    use crate::error::Error;
    use crate::patcher::readiness::{STATUS_CONFIG_MAP, STATUS_KEY};
    use crate::patcher::vanilla::PATCHER_DAEMON_SET;
    use crate::store::{fixtures, MemoryStore};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use parking_lot::RwLock;

    const NS: &str = "csi";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn spec(platform: &str) -> DeploymentSpec {
        let mut spec = DeploymentSpec {
            platform: platform.into(),
            ..Default::default()
        };
        spec.scheduler.patcher.enable = true;
        spec
    }

    struct Harness {
        store: Arc<MemoryStore>,
        now: Arc<RwLock<DateTime<Utc>>>,
        coordinator: SchedulerPatchCoordinator,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            store.set_now(t0());
            let now = Arc::new(RwLock::new(t0()));
            let clock_now = now.clone();
            let coordinator = SchedulerPatchCoordinator::new(store.clone(), NS)
                .with_clock(Arc::new(move || *clock_now.read()));
            Self { store, now, coordinator }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.write();
            *now = *now + by;
            self.store.set_now(*now);
        }

        fn scheduler_pod(&self, node: &str, started: DateTime<Utc>) {
            self.store.add_pod(fixtures::running_pod(
                "kube-system",
                &format!("kube-scheduler-{}", node),
                "component=kube-scheduler",
                node,
                Some(started),
            ));
        }

        fn ledger(&self) -> ReadinessStatusList {
            let cm = self.store.config_map(NS, STATUS_CONFIG_MAP).unwrap();
            serde_yaml::from_str(&cm.data.unwrap()[STATUS_KEY]).unwrap()
        }

        fn extender_created_at(&self) -> DateTime<Utc> {
            self.store
                .config_map(NS, "schedulerpatcher-config")
                .unwrap()
                .metadata
                .creation_timestamp
                .unwrap()
                .0
        }
    }

    #[tokio::test]
    async fn test_disabled_or_unknown_platform_is_a_no_op() {
        let h = Harness::new();

        let mut disabled = spec("vanilla");
        disabled.scheduler.patcher.enable = false;
        h.coordinator.reconcile(&disabled).await.unwrap();

        h.coordinator.reconcile(&spec("nomad")).await.unwrap();

        assert_eq!(h.store.mutations().total(), 0);
    }

    #[tokio::test]
    async fn test_vanilla_patch_is_idempotent() {
        let h = Harness::new();
        let spec = spec("vanilla");

        h.coordinator.reconcile(&spec).await.unwrap();
        assert!(h.store.config_map(NS, "schedulerpatcher-config").is_some());
        assert!(h.store.daemon_set(NS, PATCHER_DAEMON_SET).is_some());

        let before = h.store.mutations();
        h.coordinator.reconcile(&spec).await.unwrap();
        assert_eq!(h.store.mutations().since(&before).updates, 0);
        assert_eq!(h.store.mutations().since(&before).total(), 0);
    }

    #[tokio::test]
    async fn test_ledger_tracks_restart_around_epoch() {
        let h = Harness::new();
        let spec = spec("rke");
        h.scheduler_pod("master-1", t0() - Duration::seconds(1));
        h.scheduler_pod("master-2", t0() + Duration::seconds(1));

        h.coordinator.reconcile(&spec).await.unwrap();

        let ledger = h.ledger();
        assert_eq!(ledger.nodes.len(), 2);
        assert_eq!(ledger.nodes[0].node_name, "master-1");
        assert!(!ledger.nodes[0].restarted);
        assert_eq!(ledger.nodes[1].node_name, "master-2");
        assert!(ledger.nodes[1].restarted);
    }

    #[tokio::test]
    async fn test_stalled_rollout_is_retried_after_timeout() {
        let h = Harness::new();
        let spec = spec("vanilla");
        h.scheduler_pod("master-1", t0() - Duration::minutes(10));

        h.coordinator.reconcile(&spec).await.unwrap();
        assert_eq!(h.extender_created_at(), t0());

        // Within the timeout nothing is reinstalled
        h.advance(Duration::minutes(4));
        h.coordinator.reconcile(&spec).await.unwrap();
        assert_eq!(h.extender_created_at(), t0());

        h.advance(Duration::minutes(2));
        let before = h.store.mutations();
        h.coordinator.reconcile(&spec).await.unwrap();

        assert_eq!(h.extender_created_at(), t0() + Duration::minutes(6));
        let delta = h.store.mutations().since(&before);
        assert_eq!(delta.deletes, 2);
        assert_eq!(delta.creates, 2);
    }

    #[test]
    fn test_readiness_timeout_conversion() {
        assert_eq!(readiness_timeout(5), Some(Duration::minutes(5)));
        assert_eq!(readiness_timeout(0), Some(Duration::zero()));
        assert_eq!(readiness_timeout(u64::MAX), None);
        assert_eq!(readiness_timeout(i64::MAX as u64), None);
    }

    #[tokio::test]
    async fn test_huge_timeout_never_expires() {
        let h = Harness::new();
        let mut spec = spec("vanilla");
        spec.scheduler.patcher.readiness_timeout = u64::MAX;
        h.scheduler_pod("master-1", t0() - Duration::minutes(10));

        h.coordinator.reconcile(&spec).await.unwrap();
        h.advance(Duration::days(365));
        let before = h.store.mutations();
        h.coordinator.reconcile(&spec).await.unwrap();

        assert_eq!(h.store.mutations().since(&before).deletes, 0);
        assert_eq!(h.extender_created_at(), t0());
    }

    #[tokio::test]
    async fn test_no_retry_once_every_scheduler_restarted() {
        let h = Harness::new();
        let spec = spec("vanilla");
        h.scheduler_pod("master-1", t0() + Duration::seconds(30));

        h.coordinator.reconcile(&spec).await.unwrap();
        h.advance(Duration::hours(1));
        let before = h.store.mutations();
        h.coordinator.reconcile(&spec).await.unwrap();

        assert_eq!(h.store.mutations().since(&before).total(), 0);
        assert!(h.ledger().nodes[0].restarted);
    }

    #[tokio::test]
    async fn test_openshift_conflict_leaves_field_unchanged() {
        let h = Harness::new();
        h.store.add_scheduler(Scheduler::new(
            "cluster",
            SchedulerSpec {
                policy: Some(ConfigMapNameReference {
                    name: "custom-policy".into(),
                }),
                ..Default::default()
            },
        ));

        let err = h.coordinator.reconcile(&spec("openshift")).await.unwrap_err();

        assert_matches!(err, Error::Conflict { .. });
        assert!(!err.is_retryable());
        assert_eq!(h.store.scheduler("cluster").unwrap().policy_name(), "custom-policy");
    }

    #[tokio::test]
    async fn test_openshift_readiness_uses_watched_config_map() {
        let h = Harness::new();
        h.store.add_scheduler(Scheduler::new("cluster", SchedulerSpec::default()));
        h.store.add_config_map(fixtures::config_map_created_at(
            "openshift-kube-scheduler",
            "config",
            t0(),
        ));
        h.store.add_pod(fixtures::running_pod(
            "openshift-kube-scheduler",
            "openshift-kube-scheduler-m1",
            "app=openshift-kube-scheduler",
            "m1",
            Some(t0() + Duration::seconds(5)),
        ));

        h.coordinator.reconcile(&spec("openshift")).await.unwrap();

        assert_eq!(h.store.scheduler("cluster").unwrap().policy_name(), "scheduler-policy");
        assert!(h.ledger().nodes[0].restarted);
    }

    #[tokio::test]
    async fn test_unpatch_removes_daemon_set_and_config_map() {
        let h = Harness::new();
        let spec = spec("vanilla");
        h.coordinator.patch(&spec).await.unwrap();

        h.coordinator.unpatch(&spec).await.unwrap();

        assert!(h.store.daemon_set(NS, PATCHER_DAEMON_SET).is_none());
        assert!(h.store.config_map(NS, "schedulerpatcher-config").is_none());
    }
}
