//! Fetching work item addresses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};

use crate::domain::{RetryPolicy, WorkItem};
use crate::{Error, Result};

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub body: Bytes,
    pub final_url: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the item's address. Non-2xx responses are `Application` errors.
    async fn fetch(&self, item: &WorkItem) -> Result<FetchedResponse>;
}

/// HTTP(S) fetcher. Connection failures and timeouts are retried with
/// backoff; application errors are returned immediately.
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rust-capture/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, retry })
    }

    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn fetch_once(&self, url: &str, item: &WorkItem) -> Result<FetchedResponse> {
        let mut request = self.client.get(url);
        if !item.params.is_empty() {
            request = request.query(&item.params);
        }
        for (name, value) in &item.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(Error::application(
                Some(status.as_u16()),
                format!("GET {url} failed: {snippet}"),
            ));
        }

        let body = response.bytes().await?;
        Ok(FetchedResponse {
            status: status.as_u16(),
            body,
            final_url,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, item: &WorkItem) -> Result<FetchedResponse> {
        if !item.address.is_url() {
            return Err(Error::config(format!(
                "no fetcher for identifier '{}' of '{}'",
                item.address, item.spec_name
            )));
        }
        let url = item.address.as_str();

        let mut attempt = 0;
        loop {
            match self.fetch_once(url, item).await {
                Ok(response) => {
                    debug!(url, status = response.status, bytes = response.body.len(), "Fetched");
                    return Ok(response);
                }
                Err(e) if e.is_transport() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(url, attempt = attempt + 1, ?delay, error = %e, "Transport error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Dispatches by spec name to source-specific fetchers, falling back to a
/// default (usually [`HttpFetcher`]).
pub struct RoutingFetcher {
    routes: HashMap<String, Arc<dyn Fetcher>>,
    fallback: Arc<dyn Fetcher>,
}

impl RoutingFetcher {
    pub fn new(fallback: Arc<dyn Fetcher>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback,
        }
    }

    pub fn route(mut self, spec_name: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        self.routes.insert(spec_name.into(), fetcher);
        self
    }
}

#[async_trait]
impl Fetcher for RoutingFetcher {
    async fn fetch(&self, item: &WorkItem) -> Result<FetchedResponse> {
        self.routes
            .get(&item.spec_name)
            .unwrap_or(&self.fallback)
            .fetch(item)
            .await
    }
}
