//! Application configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;

use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:capture.db?mode=rwc";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Read-only database backing `query` parameters.
    pub query_database_url: Option<String>,
    pub primary_store_root: PathBuf,
    pub mirror_store_root: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub alert_webhook_url: Option<String>,
    pub fetch_timeout: Duration,
    pub fetch_max_retries: u32,
    pub max_capture_attempts: u32,
    pub max_pages_per_item: u32,
    pub timezone: Tz,
    pub stale_queue_hours: u64,
    pub capture_log_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            query_database_url: None,
            primary_store_root: PathBuf::from("data/primary"),
            mirror_store_root: PathBuf::from("data/mirror"),
            log_dir: None,
            alert_webhook_url: None,
            fetch_timeout: Duration::from_secs(30),
            fetch_max_retries: 3,
            max_capture_attempts: crate::dedup::DEFAULT_MAX_ATTEMPTS,
            max_pages_per_item: 1000,
            timezone: chrono_tz::UTC,
            stale_queue_hours: 24,
            capture_log_key: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unset and blank variables
    /// take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            query_database_url: get("QUERY_DATABASE_URL"),
            primary_store_root: get("PRIMARY_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.primary_store_root),
            mirror_store_root: get("MIRROR_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.mirror_store_root),
            log_dir: get("LOG_DIR").map(PathBuf::from),
            alert_webhook_url: get("ALERT_WEBHOOK_URL"),
            fetch_timeout: parse_var(&get, "FETCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            fetch_max_retries: parse_var(&get, "FETCH_MAX_RETRIES")?
                .unwrap_or(defaults.fetch_max_retries),
            max_capture_attempts: parse_var(&get, "MAX_CAPTURE_ATTEMPTS")?
                .unwrap_or(defaults.max_capture_attempts),
            max_pages_per_item: parse_var(&get, "MAX_PAGES_PER_ITEM")?
                .unwrap_or(defaults.max_pages_per_item),
            timezone: match get("TIMEZONE") {
                Some(name) => name
                    .parse::<Tz>()
                    .map_err(|e| Error::config(format!("invalid TIMEZONE '{name}': {e}")))?,
                None => defaults.timezone,
            },
            stale_queue_hours: parse_var(&get, "STALE_QUEUE_HOURS")?
                .unwrap_or(defaults.stale_queue_hours),
            capture_log_key: get("CAPTURE_LOG_KEY"),
        })
    }

    /// The current calendar day in the configured zone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::config(format!("invalid {key} '{raw}': {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.fetch_max_retries, 3);
        assert_eq!(config.max_capture_attempts, 5);
        assert_eq!(config.timezone, chrono_tz::UTC);
        assert!(config.capture_log_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TIMEZONE", "America/Sao_Paulo"),
            ("FETCH_TIMEOUT_SECS", "5"),
            ("STALE_QUEUE_HOURS", "48"),
            ("ALERT_WEBHOOK_URL", "https://hooks.example/alert"),
            ("LOG_DIR", ""),
        ]))
        .unwrap();

        assert_eq!(config.timezone, chrono_tz::America::Sao_Paulo);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.stale_queue_hours, 48);
        assert_eq!(config.alert_webhook_url.as_deref(), Some("https://hooks.example/alert"));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("TIMEZONE", "Mars/Olympus")])),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("FETCH_MAX_RETRIES", "many")])),
            Err(Error::Configuration(_))
        ));
    }
}
