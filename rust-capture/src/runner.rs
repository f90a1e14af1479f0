//! Capture runner.
//!
//! Turns one capture job into running work: load the spec, expand it,
//! drop already captured items, persist the queue partitions, and start
//! one executor lineage per partition. Also the [`JobTrigger`] the
//! dependency scheduler drives.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::Result;
use crate::alert::{Alerter, notify_quietly};
use crate::database::models::CaptureSpecDbModel;
use crate::database::repositories::CaptureSpecRepository;
use crate::dedup::DedupTracker;
use crate::executor::Executor;
use crate::generator::{InvocationContext, WorkItemGenerator};
use crate::queue::{QueueHandle, WorkQueueStore};
use crate::scheduler::{CaptureJob, DependencyScheduler, JobTrigger, RunSummary};

const ALERT_SOURCE: &str = "runner";

/// Input of a generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInput {
    pub spec_name: String,
    pub capture_type: String,
    /// Values for `external_list` parameters.
    #[serde(default)]
    pub external_list: Vec<String>,
}

impl GenerateInput {
    pub fn new(spec_name: impl Into<String>, capture_type: impl Into<String>) -> Self {
        Self {
            spec_name: spec_name.into(),
            capture_type: capture_type.into(),
            external_list: Vec::new(),
        }
    }
}

impl From<&CaptureJob> for GenerateInput {
    fn from(job: &CaptureJob) -> Self {
        Self::new(job.name.clone(), job.capture_type.clone())
    }
}

pub struct CaptureRunner {
    specs: Arc<dyn CaptureSpecRepository>,
    generator: Arc<WorkItemGenerator>,
    dedup: Arc<DedupTracker>,
    queues: WorkQueueStore,
    executor: Arc<Executor>,
    alerter: Arc<dyn Alerter>,
    timezone: Tz,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl CaptureRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        specs: Arc<dyn CaptureSpecRepository>,
        generator: Arc<WorkItemGenerator>,
        dedup: Arc<DedupTracker>,
        queues: WorkQueueStore,
        executor: Arc<Executor>,
        alerter: Arc<dyn Alerter>,
        timezone: Tz,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            specs,
            generator,
            dedup,
            queues,
            executor,
            alerter,
            timezone,
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Expand a spec and persist its queue partitions.
    ///
    /// Returns no handles when nothing is left to capture. The spec is
    /// saved back only after its queues exist, so a failed run does not
    /// advance a delegate's cursor.
    pub async fn generate(&self, input: &GenerateInput) -> Result<Vec<QueueHandle>> {
        self.generate_for_day(input, self.today()).await
    }

    /// [`generate`](Self::generate) for an explicit local day.
    pub async fn generate_for_day(
        &self,
        input: &GenerateInput,
        today: NaiveDate,
    ) -> Result<Vec<QueueHandle>> {
        let spec = self
            .specs
            .get_spec(&input.spec_name, &input.capture_type)
            .await?
            .to_spec()?;

        let ctx = InvocationContext::new(today).with_external_list(input.external_list.clone());
        let expansion = self.generator.expand(&spec, &ctx).await?;
        let expanded = expansion.items.len();

        let items = self.dedup.filter_new(expansion.items).await?;
        let handles = self.queues.enqueue_partitions(&spec, items).await?;

        if expansion.spec_changed {
            self.specs
                .upsert_spec(&CaptureSpecDbModel::from_spec(&expansion.updated_spec)?)
                .await?;
            info!(spec = %spec.name, "Capture spec parameters advanced");
        }

        info!(
            spec = %spec.name,
            capture_type = %spec.capture_type,
            expanded,
            queues = handles.len(),
            "Generation finished"
        );
        Ok(handles)
    }

    /// Generate and start one executor lineage per partition.
    pub async fn start(&self, input: &GenerateInput) -> Result<Vec<QueueHandle>> {
        let handles = self.generate(input).await?;
        for handle in &handles {
            self.spawn_partition(handle.clone());
        }
        Ok(handles)
    }

    /// Run a partition in the background until it is exhausted.
    pub fn spawn_partition(&self, handle: QueueHandle) {
        let executor = self.executor.clone();
        let alerter = self.alerter.clone();
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            if let Err(e) = executor.run_partition(&handle, &cancel).await {
                error!(queue = %handle.name, error = %e, "Partition stopped");
                notify_quietly(
                    alerter.as_ref(),
                    ALERT_SOURCE,
                    &format!("partition '{}' stopped: {e}", handle.name),
                )
                .await;
            }
        });
    }

    /// Load the active specs of `capture_type` starting with `prefix` and
    /// run them through the dependency scheduler.
    pub async fn run(self: &Arc<Self>, capture_type: &str, prefix: &str) -> Result<RunSummary> {
        let rows = self.specs.list_active(capture_type, prefix).await?;
        let mut jobs = Vec::with_capacity(rows.len());

        for row in rows {
            match row.to_spec() {
                Ok(spec) => jobs.push(CaptureJob::from_spec(&spec)),
                Err(e) => {
                    warn!(spec = %row.name, error = %e, "Skipping unreadable capture spec");
                    notify_quietly(
                        self.alerter.as_ref(),
                        ALERT_SOURCE,
                        &format!("capture spec '{}' cannot be read: {e}", row.name),
                    )
                    .await;
                }
            }
        }

        info!(capture_type, prefix, jobs = jobs.len(), "Scheduling capture jobs");
        let trigger: Arc<dyn JobTrigger> = self.clone();
        let scheduler = DependencyScheduler::new(trigger, self.alerter.clone());
        Ok(scheduler.run(jobs).await)
    }

    /// Wait for every started partition to finish.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[async_trait]
impl JobTrigger for CaptureRunner {
    async fn trigger(&self, job: &CaptureJob) -> Result<()> {
        self.start(&GenerateInput::from(job)).await.map(|_| ())
    }
}
