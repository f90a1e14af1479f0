//! Resumable queue executor.
//!
//! One [`Executor::step`] processes the item at `order` of a queue: fetch,
//! decode, select fields, write to the primary store, replicate to the
//! mirror, update dedup state, and follow pagination until the source has
//! no more pages. It then moves the cursor down by one and deletes the
//! queue once the cursor passes below zero.
//!
//! Item-level failures are logged and alerted, and the step still
//! advances. Only infrastructure errors (the queue database itself) are
//! returned to the caller.

pub mod fetch;
pub mod pagination;
pub mod parser;
pub mod transform;
pub mod xml;

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::{Alerter, notify_quietly};
use crate::dedup::{DedupTracker, FailureOutcome};
use crate::domain::{DedupKey, WorkItem};
use crate::queue::{QueueHandle, WorkQueueStore};
use crate::storage::{BlobPath, Replicator, StorageGateway, StoreKind};
use crate::{Error, Result};

pub use fetch::{FetchedResponse, Fetcher, HttpFetcher, RoutingFetcher};
pub use pagination::{PaginationDetector, PaginationRegistry};
pub use parser::{ParserRegistry, ResponseParser};
pub use transform::{CAPTURE_DATE_FORMAT, Decoded, Record};

const ALERT_SOURCE: &str = "executor";

/// Input of one executor step; also the payload of a re-trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInput {
    pub queue_name: String,
    pub order: i64,
}

impl From<&QueueHandle> for StepInput {
    fn from(handle: &QueueHandle) -> Self {
        Self {
            queue_name: handle.name.clone(),
            order: handle.order,
        }
    }
}

/// Result of one executor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Continue with this order.
    Next(i64),
    /// The queue is exhausted (or already gone).
    Done,
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on pages followed for a single item.
    pub max_pages_per_item: u32,
    /// Zone `capture_date` is rendered in.
    pub timezone: Tz,
    /// When set, a log record per captured page is appended to this key
    /// in the item's bucket of the primary store.
    pub capture_log_key: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_pages_per_item: 1000,
            timezone: chrono_tz::UTC,
            capture_log_key: None,
        }
    }
}

/// What happened to one page.
#[derive(Debug)]
struct PageOutcome {
    records: usize,
    next: Option<WorkItem>,
}

/// Drives work queues.
pub struct Executor {
    queues: WorkQueueStore,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn StorageGateway>,
    replicator: Arc<dyn Replicator>,
    dedup: Arc<DedupTracker>,
    alerter: Arc<dyn Alerter>,
    parsers: Arc<ParserRegistry>,
    pagination: Arc<PaginationRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        queues: WorkQueueStore,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn StorageGateway>,
        replicator: Arc<dyn Replicator>,
        dedup: Arc<DedupTracker>,
        alerter: Arc<dyn Alerter>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queues,
            fetcher,
            storage,
            replicator,
            dedup,
            alerter,
            parsers: Arc::new(ParserRegistry::with_defaults()),
            pagination: Arc::new(PaginationRegistry::with_defaults()),
            config,
        }
    }

    pub fn with_parsers(mut self, parsers: Arc<ParserRegistry>) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_pagination(mut self, pagination: Arc<PaginationRegistry>) -> Self {
        self.pagination = pagination;
        self
    }

    /// Process the item at `input.order` and return where to continue.
    pub async fn step(&self, input: &StepInput) -> Result<StepOutcome> {
        let StepInput { queue_name, order } = input;

        match self.queues.get(queue_name, *order).await {
            Ok(item) => self.process_item(queue_name, *order, item).await?,
            Err(e) if e.is_not_found() => {
                if !self.queues.exists(queue_name).await? {
                    info!(queue = %queue_name, order, "Queue no longer exists, nothing to do");
                    return Ok(StepOutcome::Done);
                }
                self.alert(&format!("queue '{queue_name}' has no item at order {order}"))
                    .await;
            }
            Err(e @ Error::Serialization(_)) => {
                self.alert(&format!(
                    "queue '{queue_name}' item {order} cannot be decoded: {e}"
                ))
                .await;
            }
            Err(e) => return Err(e),
        }

        self.advance(queue_name, *order).await
    }

    /// Run a partition to completion. Returns the number of steps taken.
    pub async fn run_partition(
        &self,
        handle: &QueueHandle,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut input = StepInput::from(handle);
        let mut steps = 0u64;

        info!(queue = %input.queue_name, start_order = input.order, "Partition started");
        loop {
            if cancel.is_cancelled() {
                info!(queue = %input.queue_name, order = input.order, "Partition cancelled");
                return Ok(steps);
            }

            let outcome = self.step(&input).await?;
            steps += 1;

            match outcome {
                StepOutcome::Next(order) => input.order = order,
                StepOutcome::Done => {
                    info!(queue = %input.queue_name, steps, "Partition finished");
                    return Ok(steps);
                }
            }
        }
    }

    async fn advance(&self, queue_name: &str, order: i64) -> Result<StepOutcome> {
        let next = order - 1;
        if next < 0 {
            self.queues.delete(queue_name).await?;
            return Ok(StepOutcome::Done);
        }
        debug!(queue = %queue_name, next_order = next, "Advancing");
        Ok(StepOutcome::Next(next))
    }

    async fn process_item(&self, queue_name: &str, order: i64, item: WorkItem) -> Result<()> {
        let mut current = item;
        let mut pages = 0u32;
        let mut records = 0usize;

        loop {
            pages += 1;
            let outcome = match self.capture_page(&current).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.handle_failure(queue_name, order, &current, &e).await;
                    break;
                }
            };
            records += outcome.records;
            self.write_capture_log(queue_name, order, &current, outcome.records)
                .await;

            match outcome.next {
                Some(next) if next.address == current.address => {
                    warn!(queue = %queue_name, order, address = %current.address, "Next page points at the current page, stopping");
                    break;
                }
                Some(_) if pages >= self.config.max_pages_per_item => {
                    self.alert(&format!(
                        "'{}' stopped after {} pages at {}",
                        current.spec_name, pages, current.address
                    ))
                    .await;
                    break;
                }
                Some(next) => {
                    debug!(queue = %queue_name, order, page = next.page, address = %next.address, "Following next page");
                    current = next;
                }
                None => break,
            }
        }

        info!(queue = %queue_name, order, pages, records, "Item processed");
        Ok(())
    }

    /// Fetch, transform, store and replicate one page.
    async fn capture_page(&self, item: &WorkItem) -> Result<PageOutcome> {
        let response = self.fetcher.fetch(item).await?;
        let address = item.address.as_str();
        let decoded =
            transform::decode(&response.body, &item.data_type, &self.parsers, address)?;

        let next = match (&item.pagination, decoded.tree()) {
            (Some(name), Some(tree)) => {
                let detector = self.pagination.get(name).ok_or_else(|| {
                    Error::config(format!("unknown pagination detector '{name}'"))
                })?;
                detector.next_page(tree, item)
            }
            _ => None,
        };

        let capture_date = Utc::now()
            .with_timezone(&self.config.timezone)
            .format(CAPTURE_DATE_FORMAT)
            .to_string();
        let records = transform::transform(decoded, &item.fields, address, &capture_date)?;

        if records.is_empty() {
            debug!(address, "No records selected, nothing written");
            if let Some(key) = &item.dedup {
                self.record_failure(key, "response contained no records")
                    .await;
            }
            return Ok(PageOutcome { records: 0, next });
        }

        let path = BlobPath::new(&item.bucket, &item.destination);
        self.storage
            .put_blob(StoreKind::Primary, &path, transform::to_ndjson(&records)?)
            .await?;

        match self.replicator.replicate(&path).await {
            Ok(()) => {
                if let Some(key) = &item.dedup {
                    self.dedup.mark_captured(key).await?;
                }
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Mirror replication failed");
                self.alert(&format!("replication of {path} failed: {e}"))
                    .await;
                if let Some(key) = &item.dedup {
                    self.record_failure(key, &e.to_string()).await;
                }
            }
        }

        Ok(PageOutcome {
            records: records.len(),
            next,
        })
    }

    async fn handle_failure(&self, queue_name: &str, order: i64, item: &WorkItem, error: &Error) {
        warn!(
            queue = %queue_name,
            order,
            address = %item.address,
            error = %error,
            "Item failed"
        );
        self.alert(&format!(
            "'{}' failed at {} (queue {}, order {}): {}",
            item.spec_name, item.address, queue_name, order, error
        ))
        .await;

        if let Some(key) = &item.dedup {
            self.record_failure(key, &error.to_string()).await;
        }
    }

    async fn record_failure(&self, key: &DedupKey, error: &str) {
        match self.dedup.record_failure(key, error).await {
            Ok(FailureOutcome::DeadLettered { attempts }) => {
                self.alert(&format!(
                    "'{key}' abandoned after {attempts} failed attempts: {error}"
                ))
                .await;
            }
            Ok(FailureOutcome::Retry { .. }) => {}
            Err(e) => warn!(key = %key, error = %e, "Failed to record capture failure"),
        }
    }

    async fn write_capture_log(&self, queue_name: &str, order: i64, item: &WorkItem, records: usize) {
        let Some(log_key) = &self.config.capture_log_key else {
            return;
        };

        let record = json!({
            "queue": queue_name,
            "order": order,
            "spec": item.spec_name,
            "address": item.address.as_str(),
            "destination": item.destination,
            "page": item.page,
            "records": records,
            "logged_at": Utc::now().to_rfc3339(),
        });
        let path = BlobPath::new(&item.bucket, log_key);
        if let Err(e) = self
            .storage
            .put_record(StoreKind::Primary, &path, &record)
            .await
        {
            warn!(path = %path, error = %e, "Failed to append capture log");
        }
    }

    async fn alert(&self, message: &str) {
        notify_quietly(self.alerter.as_ref(), ALERT_SOURCE, message).await;
    }
}
