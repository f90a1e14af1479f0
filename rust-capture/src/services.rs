//! Service container.
//!
//! Builds every component from an [`AppConfig`] and hands out shared
//! references to them.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::alert::{Alerter, FanoutAlerter, LogAlerter, WebhookAlertConfig, WebhookAlerter};
use crate::config::AppConfig;
use crate::database::repositories::{
    CaptureSpecRepository, SqlxCaptureSpecRepository, SqlxDedupRepository, SqlxWorkQueueRepository,
};
use crate::database::{self, DbPool, WritePool};
use crate::dedup::DedupTracker;
use crate::domain::RetryPolicy;
use crate::executor::{Executor, ExecutorConfig, HttpFetcher};
use crate::generator::{ModuleRegistry, QuerySource, SqliteQuerySource, WorkItemGenerator};
use crate::maintenance::Maintenance;
use crate::queue::WorkQueueStore;
use crate::runner::CaptureRunner;
use crate::storage::{CopyReplicator, FsStorageGateway, StorageGateway};
use crate::{Error, Result};

pub struct ServiceContainer {
    pub pool: DbPool,
    pub specs: Arc<dyn CaptureSpecRepository>,
    pub queues: WorkQueueStore,
    pub dedup: Arc<DedupTracker>,
    pub alerter: Arc<dyn Alerter>,
    pub executor: Arc<Executor>,
    pub runner: Arc<CaptureRunner>,
    pub maintenance: Arc<Maintenance>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Open the databases, run migrations and wire every component.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        let write_pool = database::init_write_pool(&config.database_url).await?;

        let query_source: Option<Arc<dyn QuerySource>> = match &config.query_database_url {
            Some(url) => Some(Arc::new(SqliteQuerySource::connect(url).await?)),
            None => None,
        };

        Self::with_pools(pool, write_pool, query_source, config)
    }

    /// Wire components over existing pools.
    pub fn with_pools(
        pool: DbPool,
        write_pool: WritePool,
        query_source: Option<Arc<dyn QuerySource>>,
        config: &AppConfig,
    ) -> Result<Self> {
        let cancellation_token = CancellationToken::new();

        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(concat!("rust-capture/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        let specs: Arc<dyn CaptureSpecRepository> = Arc::new(SqlxCaptureSpecRepository::new(
            pool.clone(),
            write_pool.clone(),
        ));
        let queues = WorkQueueStore::new(Arc::new(SqlxWorkQueueRepository::new(
            pool.clone(),
            write_pool.clone(),
        )));
        let dedup = Arc::new(DedupTracker::new(
            Arc::new(SqlxDedupRepository::new(pool.clone(), write_pool)),
            config.max_capture_attempts,
        ));

        let alerter = build_alerter(config);

        let storage: Arc<dyn StorageGateway> = Arc::new(FsStorageGateway::new(
            &config.primary_store_root,
            &config.mirror_store_root,
        ));
        let replicator = Arc::new(CopyReplicator::new(storage.clone()));
        let fetcher = Arc::new(HttpFetcher::with_client(
            client.clone(),
            RetryPolicy::with_max_retries(config.fetch_max_retries),
        ));

        let executor = Arc::new(Executor::new(
            queues.clone(),
            fetcher,
            storage,
            replicator,
            dedup.clone(),
            alerter.clone(),
            ExecutorConfig {
                max_pages_per_item: config.max_pages_per_item,
                timezone: config.timezone,
                capture_log_key: config.capture_log_key.clone(),
            },
        ));

        let generator = Arc::new(WorkItemGenerator::new(
            Arc::new(ModuleRegistry::with_defaults(client)),
            query_source,
        ));

        let runner = Arc::new(CaptureRunner::new(
            specs.clone(),
            generator,
            dedup.clone(),
            queues.clone(),
            executor.clone(),
            alerter.clone(),
            config.timezone,
            cancellation_token.clone(),
        ));

        let maintenance = Arc::new(Maintenance::new(
            specs.clone(),
            queues.clone(),
            dedup.clone(),
            config.stale_queue_hours,
            config.timezone,
        ));

        info!("Service container initialized");

        Ok(Self {
            pool,
            specs,
            queues,
            dedup,
            alerter,
            executor,
            runner,
            maintenance,
            cancellation_token,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Stop running partitions after their current step and wait for them.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();
        self.runner.wait().await;
        self.pool.close().await;
    }
}

fn build_alerter(config: &AppConfig) -> Arc<dyn Alerter> {
    match &config.alert_webhook_url {
        Some(url) => Arc::new(FanoutAlerter::new(vec![
            Arc::new(LogAlerter),
            Arc::new(WebhookAlerter::new(WebhookAlertConfig::new(url.clone()))),
        ])),
        None => Arc::new(LogAlerter),
    }
}
