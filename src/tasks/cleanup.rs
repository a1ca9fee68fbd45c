//! Capacity reservation cleanup
//!
//! The scheduler extender leaves AvailableCapacityReservation records behind
//! when a pod is rejected or never gets scheduled. This task sweeps them on a
//! fixed interval until its token is cancelled.

use crate::crd::{reservation_status, AvailableCapacityReservation};
use crate::domain::ports::ResourceStoreRef;
use crate::error::{ignore_not_found, AggregateError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cleanup schedule
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Reservations older than this are removed whatever their status
    pub ttl: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            ttl: Duration::from_secs(3600),
        }
    }
}

pub struct ReservationCleaner {
    store: ResourceStoreRef,
    config: CleanupConfig,
    token: CancellationToken,
}

impl ReservationCleaner {
    pub fn new(store: ResourceStoreRef, config: CleanupConfig, token: CancellationToken) -> Self {
        Self { store, config, token }
    }

    /// Sweep on every tick until cancelled
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval.as_secs(),
            ttl_secs = self.config.ttl.as_secs(),
            "Reservation cleaner started"
        );

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Reservation cleaner cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "Reservation sweep failed");
                    }
                }
            }
        }
    }

    /// Delete stale reservations, returning how many were removed
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let reservations = self.store.list_reservations().await?;
        let mut errors = AggregateError::new();
        let mut removed = 0;

        for reservation in reservations.iter().filter(|r| self.is_stale(r, now)) {
            let name = reservation.metadata.name.as_deref().unwrap_or_default();
            if errors
                .capture(ignore_not_found(self.store.delete_reservation(name).await))
                .is_some()
            {
                debug!(reservation = %name, status = %reservation.spec.status, "Removed reservation");
                removed += 1;
            }
        }

        if removed > 0 {
            metrics::RESERVATIONS_CLEANED.inc_by(removed as u64);
            info!(removed, "Cleaned up capacity reservations");
        }
        errors.into_result().map(|_| removed)
    }

    fn is_stale(&self, reservation: &AvailableCapacityReservation, now: DateTime<Utc>) -> bool {
        if reservation.spec.status == reservation_status::REJECTED {
            return true;
        }
        let Some(created) = reservation.metadata.creation_timestamp.as_ref() else {
            return false;
        };
        now.signed_duration_since(created.0)
            .to_std()
            .map_or(false, |age| age > self.config.ttl)
    }
}
