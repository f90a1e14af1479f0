//! Work queue database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::domain::WorkItem;

/// One queue partition of a capture run.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkQueueDbModel {
    pub name: String,
    pub spec_name: String,
    pub capture_type: String,
    pub partition_index: i64,
    pub total_items: i64,
    pub created_at: i64,
}

/// One enqueued work item.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkItemDbModel {
    pub queue_name: String,
    pub order_index: i64,
    /// JSON-encoded [`WorkItem`].
    pub payload: String,
}

impl WorkItemDbModel {
    pub fn new(queue_name: impl Into<String>, order_index: i64, item: &WorkItem) -> Result<Self> {
        Ok(Self {
            queue_name: queue_name.into(),
            order_index,
            payload: serde_json::to_string(item)?,
        })
    }

    pub fn to_item(&self) -> Result<WorkItem> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
