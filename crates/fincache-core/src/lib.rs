//! fincache core - the offline caching layer of the finance dashboard.
//!
//! The worker sits between the dashboard and the network. It answers each
//! intercepted GET with a cache-first, network-first or
//! stale-while-revalidate protocol, keeps versioned cache partitions,
//! cleans up old versions on activation, runs background sync and
//! exchange-rate refreshes, and talks to foreground contexts through a
//! small message protocol.
//!
//! Components (leaves first):
//! - `cache`: named partitions, optionally mirrored to disk
//! - `strategy`: per-request protocol selection and execution
//! - `lifecycle`: install / activate / takeover
//! - `background`: sync and periodic refresh tasks
//! - `messaging`: foreground commands, push notifications
//! - `worker`: the process-wide context and event dispatch

pub mod background;
pub mod cache;
pub mod clients;
pub mod config;
pub mod episode;
pub mod lifecycle;
pub mod messaging;
pub mod models;
pub mod net;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use background::{BackgroundRunner, PendingRecord, PendingRecordStore, RecordProcessor};
pub use cache::{CacheError, CacheStorage, MatchScope};
pub use clients::Clients;
pub use config::{ConfigError, WorkerConfig};
pub use episode::Episode;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use messaging::{MessagingEndpoint, NotificationPresenter};
pub use models::{Request, RequestMode, Response};
pub use net::{FetchError, Fetcher, HttpFetcher};
pub use reqwest::{Method, Url};
pub use strategy::{FetchOutcome, ResponseSource, Strategy, StrategyEngine};
pub use worker::{Dispatched, EventKind, EventOutcome, Worker, WorkerEvent};
