//! Webhook alert channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::Alerter;
use crate::{Error, Result};

/// Webhook alert configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAlertConfig {
    pub url: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl WebhookAlertConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Posts `{function, message, timestamp}` to a webhook.
pub struct WebhookAlerter {
    config: WebhookAlertConfig,
    client: Client,
}

impl WebhookAlerter {
    pub fn new(config: WebhookAlertConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
            {
                headers.insert(name, value);
            }
        }
        headers
    }

    fn build_payload(source: &str, message: &str) -> serde_json::Value {
        json!({
            "function": source,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, source: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .headers(self.build_headers())
            .json(&Self::build_payload(source, message))
            .send()
            .await
            .map_err(|e| Error::Other(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Alert webhook failed: {} - {}", status, body);
            return Err(Error::Other(format!(
                "Alert webhook failed: {} - {}",
                status, body
            )));
        }

        debug!(source, "Alert webhook sent");
        Ok(())
    }
}
