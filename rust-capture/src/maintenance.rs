//! Periodic housekeeping: stale queue cleanup and daily dedup resets.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::CaptureSpecRepository;
use crate::database::time::hours_ago_ms;
use crate::dedup::DedupTracker;
use crate::queue::WorkQueueStore;

/// Interval between maintenance passes in [`Maintenance::run_loop`].
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub deleted_queues: Vec<String>,
    /// Namespaces cleared, with the number of identifiers removed.
    pub reset_namespaces: Vec<(String, u64)>,
}

pub struct Maintenance {
    specs: Arc<dyn CaptureSpecRepository>,
    queues: WorkQueueStore,
    dedup: Arc<DedupTracker>,
    stale_queue_hours: u64,
    timezone: Tz,
}

impl Maintenance {
    pub fn new(
        specs: Arc<dyn CaptureSpecRepository>,
        queues: WorkQueueStore,
        dedup: Arc<DedupTracker>,
        stale_queue_hours: u64,
        timezone: Tz,
    ) -> Self {
        Self {
            specs,
            queues,
            dedup,
            stale_queue_hours,
            timezone,
        }
    }

    /// Delete queues older than the configured age.
    pub async fn cleanup_stale_queues(&self) -> Result<Vec<String>> {
        let cutoff = hours_ago_ms(self.stale_queue_hours);
        let deleted = self.queues.delete_created_before(cutoff).await?;
        if !deleted.is_empty() {
            info!(count = deleted.len(), max_age_hours = self.stale_queue_hours, "Deleted stale queues");
        }
        Ok(deleted)
    }

    /// Clear every daily-reset namespace not yet reset for `today`.
    pub async fn reset_daily_namespaces(&self, today: NaiveDate) -> Result<Vec<(String, u64)>> {
        let mut namespaces = BTreeSet::new();
        for row in self.specs.list_all_active().await? {
            match row.to_spec() {
                Ok(spec) => {
                    if let Some(policy) = spec.dedup.filter(|p| p.daily_reset) {
                        namespaces.insert(policy.namespace);
                    }
                }
                Err(e) => warn!(spec = %row.name, error = %e, "Skipping unreadable capture spec"),
            }
        }

        let mut reset = Vec::new();
        for namespace in namespaces {
            if let Some(removed) = self.dedup.reset_if_new_day(&namespace, today).await? {
                reset.push((namespace, removed));
            }
        }
        Ok(reset)
    }

    /// One full pass for the local day in the configured zone.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        Ok(MaintenanceReport {
            deleted_queues: self.cleanup_stale_queues().await?,
            reset_namespaces: self.reset_daily_namespaces(today).await?,
        })
    }

    /// Run a pass now and then every `interval` until cancelled.
    pub async fn run_loop(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            match self.run_once().await {
                Ok(report) => debug!(?report, "Maintenance pass finished"),
                Err(e) => warn!(error = %e, "Maintenance pass failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Maintenance task shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
