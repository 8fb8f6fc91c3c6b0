//! Strategy Engine.
//!
//! Every intercepted request is answered by one of three protocols, chosen
//! only from where the request is going:
//!
//! - same origin → cache-first against the static partition
//! - allow-listed content-delivery host → stale-while-revalidate against the dynamic partition
//! - anything else → network-first against the dynamic partition
//!
//! Non-GET and non-http(s) requests are never intercepted.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, MatchScope};
use crate::config::{ConfigError, WorkerConfig};
use crate::episode::Episode;
use crate::models::{Request, Response};
use crate::net::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

/// Where a returned response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Cached copy served because the network failed
    Stale,
    OfflineDocument,
    /// The fixed 503
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not intercepted; the platform handles the request itself.
    Passthrough,
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    fn respond(response: Response, source: ResponseSource) -> Self {
        FetchOutcome::Respond { response, source }
    }

    fn unavailable() -> Self {
        Self::respond(Response::service_unavailable(), ResponseSource::Unavailable)
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            FetchOutcome::Passthrough => None,
        }
    }
}

pub struct StrategyEngine {
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    cdn_hosts: Vec<String>,
    static_cache: String,
    dynamic_cache: String,
    offline_document: String,
}

impl StrategyEngine {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            storage,
            fetcher,
            origin: config.origin_url()?,
            cdn_hosts: config.cdn_hosts.clone(),
            static_cache: config.static_cache_name(),
            dynamic_cache: config.dynamic_cache_name(),
            offline_document: config.resolve(&config.offline_document)?.into(),
        })
    }

    /// Pick the protocol for `request`, or `None` if it must pass through.
    pub fn classify(&self, request: &Request) -> Option<Strategy> {
        if !request.is_interceptable() {
            return None;
        }
        if request.url.origin() == self.origin.origin() {
            return Some(Strategy::CacheFirst);
        }
        let host = request.url.host_str().unwrap_or_default();
        if self.cdn_hosts.iter().any(|cdn| host.contains(cdn.as_str())) {
            Some(Strategy::StaleWhileRevalidate)
        } else {
            Some(Strategy::NetworkFirst)
        }
    }

    /// Answer an intercepted request. Never fails: errors become stale or 503 responses.
    pub async fn handle(&self, request: &Request, episode: &Episode) -> FetchOutcome {
        let Some(strategy) = self.classify(request) else {
            debug!(method = %request.method, url = %request.url, "Passing request through");
            return FetchOutcome::Passthrough;
        };
        debug!(url = %request.url, ?strategy, "Handling request");

        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, episode).await,
        }
    }

    async fn cache_first(&self, request: &Request) -> FetchOutcome {
        let key = request.cache_key();
        if let Some(entry) = self.storage.lookup(MatchScope::Named(&self.static_cache), &key).await {
            return FetchOutcome::respond(entry.response, ResponseSource::Cache);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                store(&self.storage, &self.static_cache, &key, &response).await;
                FetchOutcome::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first fetch failed");
                if request.is_navigation() {
                    if let Some(entry) = self.storage.lookup(MatchScope::All, &self.offline_document).await {
                        return FetchOutcome::respond(entry.response, ResponseSource::OfflineDocument);
                    }
                }
                FetchOutcome::unavailable()
            }
        }
    }

    async fn network_first(&self, request: &Request) -> FetchOutcome {
        let key = request.cache_key();
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                store(&self.storage, &self.dynamic_cache, &key, &response).await;
                FetchOutcome::respond(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network-first fetch failed, trying cache");
                match self.storage.lookup(MatchScope::Named(&self.dynamic_cache), &key).await {
                    Some(entry) => FetchOutcome::respond(entry.response, ResponseSource::Stale),
                    None => FetchOutcome::unavailable(),
                }
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &Request, episode: &Episode) -> FetchOutcome {
        let key = request.cache_key();
        let cached = self.storage.lookup(MatchScope::Named(&self.dynamic_cache), &key).await;

        match cached {
            Some(entry) => {
                // Refresh detached from the response; last write wins
                let storage = Arc::clone(&self.storage);
                let fetcher = Arc::clone(&self.fetcher);
                let partition = self.dynamic_cache.clone();
                let request = request.clone();
                episode
                    .wait_until(async move {
                        match fetcher.fetch(&request).await {
                            Ok(response) => store(&storage, &partition, &key, &response).await,
                            Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed, keeping cached entry"),
                        }
                    })
                    .await;
                FetchOutcome::respond(entry.response, ResponseSource::Cache)
            }
            None => match self.fetcher.fetch(request).await {
                Ok(response) => {
                    store(&self.storage, &self.dynamic_cache, &key, &response).await;
                    FetchOutcome::respond(response, ResponseSource::Network)
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Fetch failed with nothing cached");
                    FetchOutcome::unavailable()
                }
            },
        }
    }
}

/// Write-through of a successful (2xx) response. Failures are logged only.
async fn store(storage: &CacheStorage, partition: &str, key: &str, response: &Response) {
    if !response.is_ok() {
        debug!(key = key, status = response.status, "Not caching non-success response");
        return;
    }
    if let Err(e) = storage.put(partition, key, response.clone()).await {
        warn!(partition = partition, key = key, error = %e, "Failed to cache response");
    }
}
