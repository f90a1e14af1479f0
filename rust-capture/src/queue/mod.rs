//! Persistent work queues.
//!
//! A queue is created empty, populated once with contiguous order indices
//! `0..N`, consumed from the highest index down, and deleted when the
//! cursor passes below zero.

pub mod split;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::database::models::{WorkItemDbModel, WorkQueueDbModel};
use crate::database::repositories::WorkQueueRepository;
use crate::database::time::now_ms;
use crate::domain::{CaptureSpec, WorkItem};
use crate::{Error, Result};

pub use split::split;

/// Queue name prefix shared by every capture run.
pub const QUEUE_PREFIX: &str = "temp-capture";

/// A populated queue partition and the order its consumer starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub name: String,
    pub order: i64,
}

/// Name of one partition of a capture run.
pub fn queue_name(
    spec_name: &str,
    capture_type: &str,
    created_at: DateTime<Utc>,
    run_id: &str,
    partition: usize,
) -> String {
    format!(
        "{QUEUE_PREFIX}-{spec_name}-{capture_type}-{}-{run_id}-p{partition}",
        created_at.format("%Y-%m-%d-%H-%M-%S")
    )
}

/// Durable ordered work queues backed by the database.
#[derive(Clone)]
pub struct WorkQueueStore {
    repo: Arc<dyn WorkQueueRepository>,
}

impl WorkQueueStore {
    pub fn new(repo: Arc<dyn WorkQueueRepository>) -> Self {
        Self { repo }
    }

    /// Create an empty queue. Creating an existing queue is a no-op and
    /// returns `false`.
    pub async fn create(
        &self,
        name: &str,
        spec_name: &str,
        capture_type: &str,
        partition_index: usize,
    ) -> Result<bool> {
        let queue = WorkQueueDbModel {
            name: name.to_string(),
            spec_name: spec_name.to_string(),
            capture_type: capture_type.to_string(),
            partition_index: partition_index as i64,
            total_items: 0,
            created_at: now_ms(),
        };

        let created = self.repo.create_queue(&queue).await?;
        if !created {
            debug!(queue = %name, "Queue already exists");
        }
        Ok(created)
    }

    /// Bulk-write `items` with order indices `0..items.len()`.
    ///
    /// Destinations must be unique and the queue must exist and be empty.
    pub async fn put_all(&self, name: &str, items: &[WorkItem]) -> Result<()> {
        let mut destinations = HashSet::with_capacity(items.len());
        if let Some(dup) = items
            .iter()
            .find(|item| !destinations.insert(item.destination.as_str()))
        {
            return Err(Error::validation(format!(
                "duplicate destination '{}' in queue '{}'",
                dup.destination, name
            )));
        }

        self.repo.get_queue(name).await?;
        if self.repo.count_items(name).await? > 0 {
            return Err(Error::validation(format!("queue '{name}' is already populated")));
        }

        let rows = items
            .iter()
            .enumerate()
            .map(|(order, item)| WorkItemDbModel::new(name, order as i64, item))
            .collect::<Result<Vec<_>>>()?;

        self.repo.insert_items(name, &rows).await?;
        debug!(queue = %name, items = rows.len(), "Queue populated");
        Ok(())
    }

    /// Item at `order`. A missing queue or index is `NotFound`.
    pub async fn get(&self, name: &str, order: i64) -> Result<WorkItem> {
        self.repo.get_item(name, order).await?.to_item()
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        match self.repo.get_queue(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn item_count(&self, name: &str) -> Result<i64> {
        self.repo.count_items(name).await
    }

    /// Delete a queue. Returns `false` if it was already gone.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let deleted = self.repo.delete_queue(name).await?;
        if deleted {
            info!(queue = %name, "Queue deleted");
        }
        Ok(deleted)
    }

    /// Delete every queue created before `created_before_ms` (epoch ms).
    /// Returns the names of the deleted queues.
    pub async fn delete_created_before(&self, created_before_ms: i64) -> Result<Vec<String>> {
        let stale = self.repo.list_queues_created_before(created_before_ms).await?;
        let mut deleted = Vec::with_capacity(stale.len());
        for queue in stale {
            if self.delete(&queue.name).await? {
                deleted.push(queue.name);
            }
        }
        Ok(deleted)
    }

    /// Split `items` into the spec's partitions and persist each as its own
    /// queue. Returns nothing for an empty list.
    pub async fn enqueue_partitions(
        &self,
        spec: &CaptureSpec,
        items: Vec<WorkItem>,
    ) -> Result<Vec<QueueHandle>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let run_id = &run_id[..8];
        let mut handles = Vec::new();

        for (index, partition) in split(items, spec.partitions()).into_iter().enumerate() {
            let name = queue_name(&spec.name, &spec.capture_type, created_at, run_id, index);
            self.create(&name, &spec.name, &spec.capture_type, index).await?;
            self.put_all(&name, &partition).await?;

            handles.push(QueueHandle {
                order: partition.len() as i64 - 1,
                name,
            });
        }

        info!(
            spec = %spec.name,
            partitions = handles.len(),
            "Work queues created"
        );
        Ok(handles)
    }
}
