//! Dedup tracking.
//!
//! A durable, append-only set of captured identifiers per namespace. Items
//! are filtered against it before they are enqueued, and an identifier is
//! only added once its output reached the mirror store. Repeated failures
//! are counted; an identifier that hits the attempt ceiling is dead-lettered
//! and from then on filtered like a captured one.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::DedupRepository;
use crate::domain::{DedupKey, WorkItem};

/// Default attempt ceiling before an identifier is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What happened to an identifier after a failed capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// It will be picked up again by the next run.
    Retry { attempts: i64 },
    /// It exhausted its attempts and will no longer be captured.
    DeadLettered { attempts: i64 },
}

pub struct DedupTracker {
    repo: Arc<dyn DedupRepository>,
    max_attempts: u32,
}

impl DedupTracker {
    pub fn new(repo: Arc<dyn DedupRepository>, max_attempts: u32) -> Self {
        Self {
            repo,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Drop items whose identifier was already captured or dead-lettered.
    ///
    /// Items without a dedup key always pass. Relative order is preserved.
    pub async fn filter_new(&self, items: Vec<WorkItem>) -> Result<Vec<WorkItem>> {
        let mut by_namespace: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for key in items.iter().filter_map(|item| item.dedup.as_ref()) {
            by_namespace
                .entry(key.namespace.as_str())
                .or_default()
                .push(key.identifier.clone());
        }

        let mut known: HashSet<DedupKey> = HashSet::new();
        for (namespace, identifiers) in &by_namespace {
            let existing = self
                .repo
                .existing_identifiers(namespace, identifiers)
                .await?;
            known.extend(
                existing
                    .into_iter()
                    .map(|identifier| DedupKey::new(*namespace, identifier)),
            );
        }

        let before = items.len();
        let fresh: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| item.dedup.as_ref().is_none_or(|key| !known.contains(key)))
            .collect();

        if fresh.len() != before {
            info!(
                skipped = before - fresh.len(),
                remaining = fresh.len(),
                "Filtered already captured items"
            );
        }
        Ok(fresh)
    }

    pub async fn is_captured(&self, key: &DedupKey) -> Result<bool> {
        self.repo.is_captured(&key.namespace, &key.identifier).await
    }

    /// Record `key` as captured and forget its failed attempts.
    pub async fn mark_captured(&self, key: &DedupKey) -> Result<bool> {
        let inserted = self
            .repo
            .insert_captured(&key.namespace, &key.identifier)
            .await?;
        self.repo
            .clear_attempts(&key.namespace, &key.identifier)
            .await?;
        debug!(key = %key, inserted, "Marked as captured");
        Ok(inserted)
    }

    /// Count a failed capture of `key`, dead-lettering it at the ceiling.
    pub async fn record_failure(&self, key: &DedupKey, error: &str) -> Result<FailureOutcome> {
        let attempts = self
            .repo
            .increment_attempt(&key.namespace, &key.identifier, error)
            .await?;

        if attempts >= i64::from(self.max_attempts) {
            self.repo
                .move_to_dead_letter(&key.namespace, &key.identifier, attempts, error)
                .await?;
            warn!(key = %key, attempts, "Capture attempts exhausted, dead-lettered");
            return Ok(FailureOutcome::DeadLettered { attempts });
        }

        debug!(key = %key, attempts, max = self.max_attempts, "Capture failure recorded");
        Ok(FailureOutcome::Retry { attempts })
    }

    /// Clear `namespace` once per local day.
    ///
    /// Returns the number of identifiers removed, or `None` when the
    /// namespace was already reset for `today`.
    pub async fn reset_if_new_day(&self, namespace: &str, today: NaiveDate) -> Result<Option<u64>> {
        let day = today.format("%Y-%m-%d").to_string();
        if self.repo.last_reset_day(namespace).await?.as_deref() == Some(day.as_str()) {
            return Ok(None);
        }

        let removed = self.repo.clear_namespace(namespace).await?;
        self.repo.set_last_reset_day(namespace, &day).await?;
        info!(namespace, removed, day = %day, "Daily dedup reset");
        Ok(Some(removed))
    }
}
