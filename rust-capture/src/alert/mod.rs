//! Alerting.
//!
//! Every caught-and-logged failure is also reported through an [`Alerter`].
//! Alerts are fire-and-forget: a failed notification is logged and dropped.

mod webhook;

pub use webhook::{WebhookAlerter, WebhookAlertConfig};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::Result;

#[async_trait]
pub trait Alerter: Send + Sync {
    fn channel_type(&self) -> &'static str;

    /// Report `message` raised by `source`.
    async fn notify(&self, source: &str, message: &str) -> Result<()>;
}

/// Send an alert, logging instead of propagating a delivery failure.
pub async fn notify_quietly(alerter: &dyn Alerter, source: &str, message: &str) {
    if let Err(e) = alerter.notify(source, message).await {
        tracing::warn!(
            channel = alerter.channel_type(),
            source,
            error = %e,
            "Failed to deliver alert"
        );
    }
}

/// Writes alerts to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    fn channel_type(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, source: &str, message: &str) -> Result<()> {
        tracing::error!(source, "{}", message);
        Ok(())
    }
}

/// A delivered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Keeps alerts in memory, for dry runs and inspection.
#[derive(Debug, Default)]
pub struct MemoryAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

#[async_trait]
impl Alerter for MemoryAlerter {
    fn channel_type(&self) -> &'static str {
        "memory"
    }

    async fn notify(&self, source: &str, message: &str) -> Result<()> {
        self.alerts.lock().push(Alert {
            source: source.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Delivers each alert to every inner alerter.
pub struct FanoutAlerter {
    alerters: Vec<Arc<dyn Alerter>>,
}

impl FanoutAlerter {
    pub fn new(alerters: Vec<Arc<dyn Alerter>>) -> Self {
        Self { alerters }
    }
}

#[async_trait]
impl Alerter for FanoutAlerter {
    fn channel_type(&self) -> &'static str {
        "fanout"
    }

    async fn notify(&self, source: &str, message: &str) -> Result<()> {
        for alerter in &self.alerters {
            notify_quietly(alerter.as_ref(), source, message).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Broken;

    #[async_trait]
    impl Alerter for Broken {
        fn channel_type(&self) -> &'static str {
            "broken"
        }

        async fn notify(&self, _source: &str, _message: &str) -> Result<()> {
            Err(Error::Other("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_fanout_survives_failing_channel() {
        let memory = Arc::new(MemoryAlerter::new());
        let fanout = FanoutAlerter::new(vec![Arc::new(Broken), memory.clone()]);

        fanout.notify("executor", "item failed").await.unwrap();

        let alerts = memory.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].source, "executor");
        assert_eq!(alerts[0].message, "item failed");
    }

    #[tokio::test]
    async fn test_notify_quietly_swallows_errors() {
        notify_quietly(&Broken, "scheduler", "x").await;
    }
}
