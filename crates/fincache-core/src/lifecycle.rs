//! Lifecycle Controller.
//!
//! Install pre-populates the partitions, activate purges partitions from
//! other versions and takes control of every open foreground context.
//! Transitions run one at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::Url;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::{ConfigError, WorkerConfig};
use crate::models::Request;
use crate::net::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    /// Installed and waiting to activate
    Installed,
    Activating,
    Activated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale partitions deleted
    pub deleted: usize,
    /// Foreground contexts newly controlled
    pub claimed: usize,
}

pub struct Lifecycle {
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<Clients>,
    static_assets: Vec<Url>,
    external_resources: Vec<Url>,
    static_cache: String,
    dynamic_cache: String,
    current_names: HashSet<String>,
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
    transition: Mutex<()>,
}

impl Lifecycle {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<Clients>,
    ) -> Result<Self, ConfigError> {
        let static_assets = config
            .static_assets
            .iter()
            .map(|path| config.resolve(path))
            .collect::<Result<Vec<_>, _>>()?;
        let external_resources = config
            .external_resources
            .iter()
            .map(|url| Url::parse(url).map_err(|e| ConfigError::InvalidUrl(url.clone(), e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            storage,
            fetcher,
            clients,
            static_assets,
            external_resources,
            static_cache: config.static_cache_name(),
            dynamic_cache: config.dynamic_cache_name(),
            current_names: config.current_cache_names(),
            state: RwLock::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
            transition: Mutex::new(()),
        })
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    async fn set_state(&self, state: LifecycleState) {
        debug!(?state, "Lifecycle state changed");
        *self.state.write().await = state;
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Pre-populate the static and dynamic partitions.
    ///
    /// Individual fetch failures are logged and counted, never fatal.
    /// Ends by requesting immediate activation.
    pub async fn install(&self) -> Result<InstallReport> {
        let _guard = self.transition.lock().await;
        self.set_state(LifecycleState::Installing).await;

        match self.populate().await {
            Ok(report) => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.set_state(LifecycleState::Installed).await;
                info!(cached = report.cached, failed = report.failed, "Install complete");
                Ok(report)
            }
            Err(e) => {
                self.set_state(LifecycleState::Parsed).await;
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport> {
        self.storage
            .open(&self.static_cache)
            .await
            .context("Failed to open static partition")?;
        self.storage
            .open(&self.dynamic_cache)
            .await
            .context("Failed to open dynamic partition")?;

        let mut report = InstallReport::default();

        // Local shell, one asset at a time
        for url in &self.static_assets {
            if self.prefetch(&self.static_cache, url).await {
                report.cached += 1;
            } else {
                report.failed += 1;
            }
        }

        // External resources in parallel
        let results = join_all(
            self.external_resources
                .iter()
                .map(|url| self.prefetch(&self.dynamic_cache, url)),
        )
        .await;
        for ok in results {
            if ok {
                report.cached += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Fetch one resource into `partition`. Returns whether it was cached.
    async fn prefetch(&self, partition: &str, url: &Url) -> bool {
        let request = Request::get(url.clone());
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_ok() => response,
            Ok(response) => {
                warn!(url = %url, status = response.status, "Skipping pre-cache of non-success response");
                return false;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to pre-cache resource");
                return false;
            }
        };

        match self.storage.put(partition, &request.cache_key(), response).await {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to store pre-cached resource");
                false
            }
        }
    }

    /// Purge partitions from other versions, then take control of open contexts.
    pub async fn activate(&self) -> ActivateReport {
        let _guard = self.transition.lock().await;
        let previous = self.state().await;
        if previous != LifecycleState::Installed {
            debug!(?previous, "Activating from unexpected state");
        }
        self.set_state(LifecycleState::Activating).await;

        let deleted = self.storage.delete_all_except(&self.current_names).await;
        let claimed = self.clients.claim().await;

        self.skip_waiting.store(false, Ordering::SeqCst);
        self.set_state(LifecycleState::Activated).await;
        info!(deleted = deleted, claimed = claimed, "Activation complete");
        ActivateReport { deleted, claimed }
    }

    /// Activate now instead of waiting for every foreground context to close.
    /// Returns the activation report if a waiting install was finalized.
    pub async fn skip_waiting(&self) -> Option<ActivateReport> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state().await == LifecycleState::Installed {
            Some(self.activate().await)
        } else {
            debug!("Skip-waiting requested with no install waiting");
            None
        }
    }
}
