//! Query-result expansion.
//!
//! Rows come from a read-only analytical store behind [`QuerySource`].
//! Columns are matched positionally against the parameter's `url_params`.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Column, Row, SqlitePool, ValueRef};

use super::Target;
use crate::domain::template;
use crate::{Error, Result};

/// Read-only source of query rows, each row rendered as strings.
#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Vec<String>>>;
}

/// [`QuerySource`] over a SQLite database opened read-only.
pub struct SqliteQuerySource {
    pool: SqlitePool,
}

impl SqliteQuerySource {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn cell_to_string(row: &sqlx::sqlite::SqliteRow, index: usize) -> Result<String> {
    let is_null = row.try_get_raw(index).map(|v| v.is_null()).unwrap_or(true);
    if is_null {
        return Ok(String::new());
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(v);
    }
    Err(Error::Database(format!(
        "query column '{}' has an unsupported type",
        row.columns()[index].name()
    )))
}

#[async_trait]
impl QuerySource for SqliteQuerySource {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Vec<String>>> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| cell_to_string(row, i))
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }
}

/// Render the query text, substituting `{name}` from `query_config`.
pub fn render_query(query: &str, query_config: &BTreeMap<String, String>) -> Result<String> {
    let vars: Vec<(&str, &str)> = query_config
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    template::render(query, &vars)
}

/// Build one target from a row.
///
/// Single-column rows name the file after the value; wider rows after
/// `k=v` pairs joined with `&`, in `url_params` order.
pub fn row_target(
    spec_name: &str,
    url_template: &str,
    url_params: &[String],
    row: &[String],
) -> Result<Target> {
    if row.len() < url_params.len() {
        return Err(Error::config(format!(
            "query row has {} columns but {} url_params are configured",
            row.len(),
            url_params.len()
        )));
    }

    let pairs: Vec<(&str, &str)> = url_params
        .iter()
        .zip(row)
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let address = template::render(url_template, &pairs)?;

    let suffix = if row.len() > 1 {
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    } else {
        row.first().cloned().unwrap_or_default()
    };

    let mut target = Target::new(address, format!("{spec_name}_{suffix}.json"));
    for (k, v) in pairs {
        target
            .aux_data
            .insert(k.to_string(), serde_json::Value::String(v.to_string()));
    }
    Ok(target)
}

pub async fn expand(
    source: &dyn QuerySource,
    spec_name: &str,
    url_template: &str,
    query: &str,
    query_config: &BTreeMap<String, String>,
    url_params: &[String],
) -> Result<Vec<Target>> {
    let query = render_query(query, query_config)?;
    let rows = source.fetch_rows(&query).await?;
    tracing::debug!(spec = spec_name, rows = rows.len(), "Query returned rows");

    rows.iter()
        .map(|row| row_target(spec_name, url_template, url_params, row))
        .collect()
}
