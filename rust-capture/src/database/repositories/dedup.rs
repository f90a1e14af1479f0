//! Dedup repository.
//!
//! Captured identifiers are append-only and rely on the primary key for
//! uniqueness, so concurrent partitions can insert without coordination.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::DeadLetterDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::Result;

/// Bound parameters per `IN (...)` lookup, well below SQLite's limit.
const LOOKUP_CHUNK_SIZE: usize = 400;

/// Dedup repository trait.
#[async_trait]
pub trait DedupRepository: Send + Sync {
    /// Identifiers among `identifiers` that are captured or dead-lettered.
    async fn existing_identifiers(
        &self,
        namespace: &str,
        identifiers: &[String],
    ) -> Result<HashSet<String>>;
    /// Record a captured identifier. Returns `false` when it was already present.
    async fn insert_captured(&self, namespace: &str, identifier: &str) -> Result<bool>;
    async fn is_captured(&self, namespace: &str, identifier: &str) -> Result<bool>;
    /// Atomically bump the attempt counter and return the new count.
    async fn increment_attempt(&self, namespace: &str, identifier: &str, error: &str)
    -> Result<i64>;
    async fn clear_attempts(&self, namespace: &str, identifier: &str) -> Result<()>;
    async fn move_to_dead_letter(
        &self,
        namespace: &str,
        identifier: &str,
        attempts: i64,
        error: &str,
    ) -> Result<()>;
    async fn list_dead_letters(&self, namespace: &str) -> Result<Vec<DeadLetterDbModel>>;
    /// Delete every captured identifier in `namespace`. Returns the number removed.
    async fn clear_namespace(&self, namespace: &str) -> Result<u64>;
    async fn last_reset_day(&self, namespace: &str) -> Result<Option<String>>;
    async fn set_last_reset_day(&self, namespace: &str, day: &str) -> Result<()>;
}

/// SQLx implementation of DedupRepository.
pub struct SqlxDedupRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxDedupRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

fn push_in_list(builder: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl DedupRepository for SqlxDedupRepository {
    async fn existing_identifiers(
        &self,
        namespace: &str,
        identifiers: &[String],
    ) -> Result<HashSet<String>> {
        let mut found = HashSet::new();

        for chunk in identifiers.chunks(LOOKUP_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT identifier FROM dedup_record WHERE namespace = ",
            );
            builder.push_bind(namespace.to_string());
            builder.push(" AND identifier IN ");
            push_in_list(&mut builder, chunk);
            builder.push(" UNION SELECT identifier FROM dead_letter WHERE namespace = ");
            builder.push_bind(namespace.to_string());
            builder.push(" AND identifier IN ");
            push_in_list(&mut builder, chunk);

            let rows: Vec<String> = builder
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await?;
            found.extend(rows);
        }

        Ok(found)
    }

    async fn insert_captured(&self, namespace: &str, identifier: &str) -> Result<bool> {
        retry_on_sqlite_busy("insert_captured", || async {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO dedup_record (namespace, identifier, captured_at) VALUES (?, ?, ?)",
            )
            .bind(namespace)
            .bind(identifier)
            .bind(now_ms())
            .execute(&self.write_pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn is_captured(&self, namespace: &str, identifier: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dedup_record WHERE namespace = ? AND identifier = ?",
        )
        .bind(namespace)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn increment_attempt(
        &self,
        namespace: &str,
        identifier: &str,
        error: &str,
    ) -> Result<i64> {
        retry_on_sqlite_busy("increment_attempt", || async {
            let attempts: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO capture_attempt (namespace, identifier, attempts, last_error, updated_at)
                VALUES (?, ?, 1, ?, ?)
                ON CONFLICT (namespace, identifier) DO UPDATE SET
                    attempts = attempts + 1,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at
                RETURNING attempts
                "#,
            )
            .bind(namespace)
            .bind(identifier)
            .bind(error)
            .bind(now_ms())
            .fetch_one(&self.write_pool)
            .await?;
            Ok(attempts)
        })
        .await
    }

    async fn clear_attempts(&self, namespace: &str, identifier: &str) -> Result<()> {
        sqlx::query("DELETE FROM capture_attempt WHERE namespace = ? AND identifier = ?")
            .bind(namespace)
            .bind(identifier)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn move_to_dead_letter(
        &self,
        namespace: &str,
        identifier: &str,
        attempts: i64,
        error: &str,
    ) -> Result<()> {
        retry_on_sqlite_busy("move_to_dead_letter", || async {
            let mut tx = self.write_pool.begin().await?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO dead_letter (namespace, identifier, attempts, last_error, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(namespace)
            .bind(identifier)
            .bind(attempts)
            .bind(error)
            .bind(now_ms())
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM capture_attempt WHERE namespace = ? AND identifier = ?")
                .bind(namespace)
                .bind(identifier)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn list_dead_letters(&self, namespace: &str) -> Result<Vec<DeadLetterDbModel>> {
        let rows = sqlx::query_as::<_, DeadLetterDbModel>(
            "SELECT * FROM dead_letter WHERE namespace = ? ORDER BY created_at",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dedup_record WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn last_reset_day(&self, namespace: &str) -> Result<Option<String>> {
        let day: Option<String> =
            sqlx::query_scalar("SELECT last_reset_day FROM dedup_namespace WHERE namespace = ?")
                .bind(namespace)
                .fetch_optional(&self.pool)
                .await?;
        Ok(day)
    }

    async fn set_last_reset_day(&self, namespace: &str, day: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dedup_namespace (namespace, last_reset_day) VALUES (?, ?)
            ON CONFLICT (namespace) DO UPDATE SET last_reset_day = excluded.last_reset_day
            "#,
        )
        .bind(namespace)
        .bind(day)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }
}
