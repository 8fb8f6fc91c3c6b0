//! Background Task Runner.
//!
//! Two tasks run outside the request path:
//!
//! - the synchronization task pushes pending records through an external
//!   processor and broadcasts `SYNC_COMPLETE` to every foreground context
//! - the periodic refresh task stores the latest exchange-rate payload in
//!   the dynamic partition
//!
//! Both are best-effort. Failures are logged and the task simply does not
//! complete; rescheduling is left to the host platform.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::{ConfigError, WorkerConfig};
use crate::models::{Request, Response, ServerMessage};
use crate::net::Fetcher;

/// A unit of application data awaiting synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub id: String,
    pub payload: Value,
}

/// Where pending records come from. Owned by the application, not the worker.
#[async_trait]
pub trait PendingRecordStore: Send + Sync {
    async fn list_pending(&self) -> Result<Vec<PendingRecord>>;

    /// Called once a record has been processed successfully.
    async fn mark_processed(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// Per-record synchronization. Owned by the application, not the worker.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process(&self, record: &PendingRecord) -> Result<()>;
}

/// Store that never has anything pending.
///
/// The application has not yet exposed its pending-record storage to the
/// worker, so this is the default until it does.
#[derive(Debug, Default)]
pub struct EmptyPendingStore;

#[async_trait]
impl PendingRecordStore for EmptyPendingStore {
    async fn list_pending(&self) -> Result<Vec<PendingRecord>> {
        Ok(Vec::new())
    }
}

/// Processor that accepts every record without doing anything.
#[derive(Debug, Default)]
pub struct NoopProcessor;

#[async_trait]
impl RecordProcessor for NoopProcessor {
    async fn process(&self, record: &PendingRecord) -> Result<()> {
        debug!(record = %record.id, "No processor configured, accepting record");
        Ok(())
    }
}

pub struct BackgroundRunner {
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<Clients>,
    store: Arc<dyn PendingRecordStore>,
    processor: Arc<dyn RecordProcessor>,
    sync_tag: String,
    periodic_tag: String,
    dynamic_cache: String,
    exchange_rates_url: Url,
    exchange_rates_key: String,
}

impl BackgroundRunner {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<Clients>,
        store: Arc<dyn PendingRecordStore>,
        processor: Arc<dyn RecordProcessor>,
    ) -> Result<Self, ConfigError> {
        let exchange_rates_url = Url::parse(&config.exchange_rates_url)
            .map_err(|e| ConfigError::InvalidUrl(config.exchange_rates_url.clone(), e.to_string()))?;

        Ok(Self {
            storage,
            fetcher,
            clients,
            store,
            processor,
            sync_tag: config.sync_tag.clone(),
            periodic_tag: config.periodic_sync_tag.clone(),
            dynamic_cache: config.dynamic_cache_name(),
            exchange_rates_url,
            exchange_rates_key: config.exchange_rates_key.clone(),
        })
    }

    /// Handle a named sync request. Returns the number of records synchronized,
    /// or `None` if the tag is not ours or the task failed.
    pub async fn on_sync(&self, tag: &str) -> Option<usize> {
        if tag != self.sync_tag {
            debug!(tag = tag, "Ignoring unknown sync tag");
            return None;
        }
        match self.sync_pending().await {
            Ok(count) => Some(count),
            Err(e) => {
                error!(error = %e, "Background sync failed");
                None
            }
        }
    }

    /// Process every pending record in order, then broadcast completion.
    /// The first failing record aborts the task without a broadcast.
    pub async fn sync_pending(&self) -> Result<usize> {
        let records = self
            .store
            .list_pending()
            .await
            .context("Failed to list pending records")?;
        info!(count = records.len(), "Synchronizing pending records");

        for record in &records {
            self.processor
                .process(record)
                .await
                .with_context(|| format!("Failed to synchronize record {}", record.id))?;
            if let Err(e) = self.store.mark_processed(&record.id).await {
                warn!(record = %record.id, error = %e, "Failed to mark record processed");
            }
        }

        let count = records.len();
        let delivered = self.clients.broadcast(&ServerMessage::SyncComplete { count }).await;
        info!(count = count, clients = delivered, "Background sync complete");
        Ok(count)
    }

    /// Handle a named periodic signal. Returns whether reference data was refreshed.
    pub async fn on_periodic_sync(&self, tag: &str) -> bool {
        if tag != self.periodic_tag {
            debug!(tag = tag, "Ignoring unknown periodic sync tag");
            return false;
        }
        match self.refresh_exchange_rates().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Exchange rate refresh failed");
                false
            }
        }
    }

    /// Fetch the exchange-rate payload and store it verbatim under its synthetic key.
    pub async fn refresh_exchange_rates(&self) -> Result<()> {
        let request = Request::get(self.exchange_rates_url.clone());
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .context("Failed to fetch exchange rates")?;

        if !response.is_ok() {
            bail!("Exchange rate endpoint returned status {}", response.status);
        }
        // Must be JSON, but is stored exactly as received
        serde_json::from_slice::<Value>(&response.body).context("Exchange rate payload is not JSON")?;

        let stored = Response::new(200, response.body).with_header("Content-Type", "application/json");
        self.storage
            .put(&self.dynamic_cache, &self.exchange_rates_key, stored)
            .await
            .context("Failed to cache exchange rates")?;
        info!(key = %self.exchange_rates_key, "Exchange rates refreshed");
        Ok(())
    }
}
