//! Capture spec repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::CaptureSpecDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Capture spec repository trait.
#[async_trait]
pub trait CaptureSpecRepository: Send + Sync {
    async fn get_spec(&self, name: &str, capture_type: &str) -> Result<CaptureSpecDbModel>;
    /// Active specs of `capture_type` whose name starts with `prefix`.
    async fn list_active(&self, capture_type: &str, prefix: &str)
    -> Result<Vec<CaptureSpecDbModel>>;
    async fn list_all_active(&self) -> Result<Vec<CaptureSpecDbModel>>;
    async fn upsert_spec(&self, spec: &CaptureSpecDbModel) -> Result<()>;
    async fn set_active(&self, name: &str, capture_type: &str, active: bool) -> Result<()>;
}

/// SQLx implementation of CaptureSpecRepository.
pub struct SqlxCaptureSpecRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxCaptureSpecRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl CaptureSpecRepository for SqlxCaptureSpecRepository {
    async fn get_spec(&self, name: &str, capture_type: &str) -> Result<CaptureSpecDbModel> {
        sqlx::query_as::<_, CaptureSpecDbModel>(
            "SELECT * FROM capture_spec WHERE name = ? AND capture_type = ?",
        )
        .bind(name)
        .bind(capture_type)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("CaptureSpec", format!("{}/{}", name, capture_type)))
    }

    async fn list_active(
        &self,
        capture_type: &str,
        prefix: &str,
    ) -> Result<Vec<CaptureSpecDbModel>> {
        let specs = sqlx::query_as::<_, CaptureSpecDbModel>(
            r#"
            SELECT * FROM capture_spec
            WHERE active = 1 AND capture_type = ? AND substr(name, 1, length(?)) = ?
            ORDER BY name
            "#,
        )
        .bind(capture_type)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(specs)
    }

    async fn list_all_active(&self) -> Result<Vec<CaptureSpecDbModel>> {
        let specs = sqlx::query_as::<_, CaptureSpecDbModel>(
            "SELECT * FROM capture_spec WHERE active = 1 ORDER BY name, capture_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(specs)
    }

    async fn upsert_spec(&self, spec: &CaptureSpecDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO capture_spec (name, capture_type, spec, active, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (name, capture_type) DO UPDATE SET
                spec = excluded.spec,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.capture_type)
        .bind(&spec.spec)
        .bind(spec.active)
        .bind(spec.updated_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn set_active(&self, name: &str, capture_type: &str, active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE capture_spec SET active = ?, updated_at = ? WHERE name = ? AND capture_type = ?",
        )
        .bind(active)
        .bind(now_ms())
        .bind(name)
        .bind(capture_type)
        .execute(&self.write_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(
                "CaptureSpec",
                format!("{}/{}", name, capture_type),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, run_migrations};
    use crate::domain::CaptureSpec;

    async fn repo() -> SqlxCaptureSpecRepository {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxCaptureSpecRepository::new(pool.clone(), pool)
    }

    fn spec(name: &str, capture_type: &str) -> CaptureSpec {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "capture_type": capture_type,
            "url": "https://example.org",
            "parameters": [{"type": "static"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = repo().await;
        let model = CaptureSpecDbModel::from_spec(&spec("camara-deputados", "daily")).unwrap();
        repo.upsert_spec(&model).await.unwrap();
        repo.upsert_spec(&model).await.unwrap();

        let stored = repo.get_spec("camara-deputados", "daily").await.unwrap();
        assert_eq!(stored.to_spec().unwrap().url, "https://example.org");

        let err = repo.get_spec("camara-deputados", "live").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_active_filters_by_type_and_prefix() {
        let repo = repo().await;
        for (name, capture_type) in [
            ("camara-deputados", "daily"),
            ("camara-votacoes", "daily"),
            ("senado-materias", "daily"),
            ("camara-historico", "historical"),
        ] {
            let model = CaptureSpecDbModel::from_spec(&spec(name, capture_type)).unwrap();
            repo.upsert_spec(&model).await.unwrap();
        }
        repo.set_active("camara-votacoes", "daily", false).await.unwrap();

        let names: Vec<String> = repo
            .list_active("daily", "camara")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["camara-deputados".to_string()]);

        assert_eq!(repo.list_active("daily", "").await.unwrap().len(), 2);
        assert_eq!(repo.list_all_active().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_prefix_is_not_a_pattern() {
        let repo = repo().await;
        let model = CaptureSpecDbModel::from_spec(&spec("camara_x", "daily")).unwrap();
        repo.upsert_spec(&model).await.unwrap();

        assert!(repo.list_active("daily", "camara%").await.unwrap().is_empty());
        assert_eq!(repo.list_active("daily", "camara_").await.unwrap().len(), 1);
    }
}
