//! Work queue repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{WorkItemDbModel, WorkQueueDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::{Error, Result};

/// Work queue repository trait.
#[async_trait]
pub trait WorkQueueRepository: Send + Sync {
    /// Insert the queue row. Returns `false` when it already existed.
    async fn create_queue(&self, queue: &WorkQueueDbModel) -> Result<bool>;
    /// Bulk-insert items in one transaction and record the queue's size.
    async fn insert_items(&self, queue_name: &str, items: &[WorkItemDbModel]) -> Result<()>;
    async fn get_queue(&self, name: &str) -> Result<WorkQueueDbModel>;
    async fn get_item(&self, queue_name: &str, order_index: i64) -> Result<WorkItemDbModel>;
    async fn count_items(&self, queue_name: &str) -> Result<i64>;
    /// Delete the queue and its items. Returns `false` when nothing was deleted.
    async fn delete_queue(&self, name: &str) -> Result<bool>;
    async fn list_queues_created_before(&self, created_before_ms: i64)
    -> Result<Vec<WorkQueueDbModel>>;
}

/// SQLx implementation of WorkQueueRepository.
pub struct SqlxWorkQueueRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxWorkQueueRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl WorkQueueRepository for SqlxWorkQueueRepository {
    async fn create_queue(&self, queue: &WorkQueueDbModel) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO work_queue
                (name, spec_name, capture_type, partition_index, total_items, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&queue.name)
        .bind(&queue.spec_name)
        .bind(&queue.capture_type)
        .bind(queue.partition_index)
        .bind(queue.total_items)
        .bind(queue.created_at)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_items(&self, queue_name: &str, items: &[WorkItemDbModel]) -> Result<()> {
        retry_on_sqlite_busy("insert_items", || async {
            let mut tx = self.write_pool.begin().await?;

            for item in items {
                sqlx::query(
                    "INSERT INTO work_item (queue_name, order_index, payload) VALUES (?, ?, ?)",
                )
                .bind(queue_name)
                .bind(item.order_index)
                .bind(&item.payload)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                "UPDATE work_queue SET total_items = (SELECT COUNT(*) FROM work_item WHERE queue_name = ?) WHERE name = ?",
            )
            .bind(queue_name)
            .bind(queue_name)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn get_queue(&self, name: &str) -> Result<WorkQueueDbModel> {
        sqlx::query_as::<_, WorkQueueDbModel>("SELECT * FROM work_queue WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("WorkQueue", name))
    }

    async fn get_item(&self, queue_name: &str, order_index: i64) -> Result<WorkItemDbModel> {
        sqlx::query_as::<_, WorkItemDbModel>(
            "SELECT * FROM work_item WHERE queue_name = ? AND order_index = ?",
        )
        .bind(queue_name)
        .bind(order_index)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("WorkItem", format!("{}#{}", queue_name, order_index)))
    }

    async fn count_items(&self, queue_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_item WHERE queue_name = ?")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_queue(&self, name: &str) -> Result<bool> {
        retry_on_sqlite_busy("delete_queue", || async {
            let mut tx = self.write_pool.begin().await?;
            sqlx::query("DELETE FROM work_item WHERE queue_name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM work_queue WHERE name = ?")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn list_queues_created_before(
        &self,
        created_before_ms: i64,
    ) -> Result<Vec<WorkQueueDbModel>> {
        let queues = sqlx::query_as::<_, WorkQueueDbModel>(
            "SELECT * FROM work_queue WHERE created_at < ? ORDER BY created_at",
        )
        .bind(created_before_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(queues)
    }
}
