//! Pagination-delegate expansion.
//!
//! Some sources can only be listed by scanning a remote index, so the list
//! of things to fetch is produced by a registered [`ExpansionModule`]. A
//! module may return updated parameters, which the caller persists so the
//! next scheduled run continues where this one stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InvocationContext, Target, date_window};
use crate::domain::{CaptureSpec, EndDate, template};
use crate::{Error, Result};

/// Result of a module run.
#[derive(Debug, Default)]
pub struct ModuleOutput {
    pub targets: Vec<Target>,
    /// New parameters for the next run, when the module advanced a cursor.
    pub params: Option<Value>,
}

/// A named expansion capability.
#[async_trait]
pub trait ExpansionModule: Send + Sync {
    fn name(&self) -> &str;

    async fn expand(
        &self,
        spec: &CaptureSpec,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<ModuleOutput>;
}

/// Registry of expansion modules, built once at startup.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ExpansionModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registry with the built-in modules.
    pub fn with_defaults(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DailyIndexModule::new(client)));
        registry
    }

    /// Register a module. A later registration under the same name wins.
    pub fn register(&mut self, module: Arc<dyn ExpansionModule>) {
        self.modules.retain(|m| m.name() != module.name());
        self.modules.push(module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExpansionModule>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_index_date_format() -> String {
    "%d-%m-%Y".to_string()
}

/// Parameters of [`DailyIndexModule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyIndexParams {
    /// Day to scan. Advanced by one after a scan that found entries or
    /// covered a day before today.
    pub end_date: EndDate,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Index address with `{date}` and `{section}` placeholders.
    pub index_url: String,
    #[serde(default = "default_index_date_format")]
    pub index_date_format: String,
    pub sections: Vec<String>,
    /// Path of keys to the entry array in the index body.
    #[serde(default)]
    pub items_path: Vec<String>,
    /// Entry field holding the item's identifier.
    pub id_field: String,
    /// Prefix turning an identifier into a fetchable address.
    #[serde(default)]
    pub item_url_prefix: String,
}

/// Scans a per-day, per-section JSON index (a gazette's table of contents)
/// and yields one target per listed entry.
pub struct DailyIndexModule {
    client: reqwest::Client,
    timeout: Duration,
}

impl DailyIndexModule {
    pub const NAME: &'static str = "daily_index";

    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(30),
        }
    }

    async fn fetch_index(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Identifiers listed in an index body.
pub fn index_entries(body: &Value, items_path: &[String], id_field: &str) -> Result<Vec<String>> {
    let mut node = body;
    for key in items_path {
        node = node
            .get(key)
            .ok_or_else(|| Error::application(None, format!("index has no '{key}' key")))?;
    }

    let entries = node
        .as_array()
        .ok_or_else(|| Error::application(None, "index entries are not an array"))?;

    Ok(entries
        .iter()
        .filter_map(|e| e.get(id_field))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

fn entry_file_name(day: NaiveDate, section: &str, id: &str) -> String {
    format!(
        "{}_s{}_{}.json",
        day.format("%Y-%m-%d"),
        section,
        id.replace("//", "/")
    )
}

#[async_trait]
impl ExpansionModule for DailyIndexModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn expand(
        &self,
        spec: &CaptureSpec,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<ModuleOutput> {
        let mut config: DailyIndexParams = serde_json::from_value(params.clone()).map_err(|e| {
            Error::config(format!("invalid '{}' params for '{}': {e}", Self::NAME, spec.name))
        })?;

        let day = date_window::resolve_end_date(&config.end_date, &config.date_format, ctx.today)?;
        if day > ctx.today {
            tracing::debug!(spec = %spec.name, %day, "Index day is in the future, waiting for the next run");
            return Ok(ModuleOutput::default());
        }

        let index_day = date_window::format_date(day, &config.index_date_format)?;
        let mut targets = Vec::new();

        for section in &config.sections {
            let url = template::render(
                &config.index_url,
                &[("date", index_day.as_str()), ("section", section.as_str())],
            )?;
            let body = self.fetch_index(&url).await?;
            let ids = index_entries(&body, &config.items_path, &config.id_field)?;
            tracing::debug!(spec = %spec.name, %section, entries = ids.len(), "Scanned index");

            for id in ids {
                let mut target = Target::new(
                    format!("{}{}", config.item_url_prefix, id),
                    entry_file_name(day, section, &id),
                );
                target
                    .aux_data
                    .insert("section".into(), Value::String(section.clone()));
                target
                    .aux_data
                    .insert("date".into(), Value::String(day.format("%Y-%m-%d").to_string()));
                targets.push(target);
            }
        }

        if targets.is_empty() && day >= ctx.today {
            tracing::debug!(spec = %spec.name, %day, "Index for today is still empty, scanning again next run");
            return Ok(ModuleOutput::default());
        }

        let next_day = date_window::shift_days(day, 1)?;
        config.end_date = EndDate::Explicit(date_window::format_date(next_day, &config.date_format)?);

        Ok(ModuleOutput {
            targets,
            params: Some(serde_json::to_value(&config)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> CaptureSpec {
        serde_json::from_value(json!({
            "name": "dou",
            "capture_type": "daily",
            "url": "",
            "parameters": [{"type": "delegate", "module": "daily_index"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_index_entries() {
        let body = json!({"jsonArray": [{"urlTitle": "portaria-1"}, {"urlTitle": 7}, {"other": 1}]});
        let ids = index_entries(&body, &["jsonArray".into()], "urlTitle").unwrap();
        assert_eq!(ids, vec!["portaria-1", "7"]);

        assert!(index_entries(&body, &["missing".into()], "urlTitle").is_err());
    }

    #[test]
    fn test_entry_file_name() {
        let day = NaiveDate::from_ymd_opt(2019, 5, 13).unwrap();
        assert_eq!(entry_file_name(day, "do1", "a//b"), "2019-05-13_sdo1_a/b.json");
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ModuleRegistry::with_defaults(reqwest::Client::new());
        assert!(registry.get(DailyIndexModule::NAME).is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.names(), vec!["daily_index"]);
    }

    #[tokio::test]
    async fn test_future_day_leaves_params_untouched() {
        let module = DailyIndexModule::new(reqwest::Client::new());
        let params = json!({
            "end_date": "2030-01-01",
            "index_url": "https://index?data={date}&secao={section}",
            "sections": ["do1"],
            "id_field": "urlTitle"
        });
        let ctx = InvocationContext::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        let out = module.expand(&spec(), &params, &ctx).await.unwrap();
        assert!(out.targets.is_empty());
        assert!(out.params.is_none());
    }

    fn empty_index_params(end_date: &str) -> Value {
        json!({
            "end_date": end_date,
            "index_url": "https://index?data={date}&secao={section}",
            "sections": [],
            "id_field": "urlTitle"
        })
    }

    #[tokio::test]
    async fn test_empty_scan_of_today_keeps_cursor() {
        let module = DailyIndexModule::new(reqwest::Client::new());
        let ctx = InvocationContext::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        let out = module
            .expand(&spec(), &empty_index_params("2024-01-01"), &ctx)
            .await
            .unwrap();
        assert!(out.targets.is_empty());
        assert!(out.params.is_none());
    }

    #[tokio::test]
    async fn test_empty_scan_of_past_day_advances_cursor() {
        let module = DailyIndexModule::new(reqwest::Client::new());
        let ctx = InvocationContext::new(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());

        let out = module
            .expand(&spec(), &empty_index_params("2024-01-01"), &ctx)
            .await
            .unwrap();
        assert!(out.targets.is_empty());
        assert_eq!(out.params.unwrap()["end_date"], "2024-01-02");
    }

    #[tokio::test]
    async fn test_bad_index_date_format_is_config_error() {
        let module = DailyIndexModule::new(reqwest::Client::new());
        let ctx = InvocationContext::new(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        let mut params = empty_index_params("2024-01-01");
        params["index_date_format"] = json!("%d-%m-%Y%z");

        let err = module.expand(&spec(), &params, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_invalid_params_are_config_errors() {
        let module = DailyIndexModule::new(reqwest::Client::new());
        let ctx = InvocationContext::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let err = module.expand(&spec(), &json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
