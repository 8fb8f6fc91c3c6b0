//! The worker context and its event dispatch table.
//!
//! `Worker` owns every component and is the only long-lived object in the
//! process. Its in-memory fields (lifecycle state, client registry) may be
//! lost whenever the host tears the process down; anything that must
//! survive lives in the partitions.
//!
//! The host delivers platform events by name. Each name maps to exactly one
//! handler (`on_install`, `on_fetch`, ...), and `dispatch` wraps every
//! handler so that errors and panics are logged instead of escaping.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::background::{
    BackgroundRunner, EmptyPendingStore, NoopProcessor, PendingRecordStore, RecordProcessor,
};
use crate::cache::CacheStorage;
use crate::clients::{Clients, OpenOutcome};
use crate::config::WorkerConfig;
use crate::episode::Episode;
use crate::lifecycle::{ActivateReport, InstallReport, Lifecycle};
use crate::messaging::{LogPresenter, MessageOutcome, MessagingEndpoint, NotificationPresenter};
use crate::models::{Notification, Request};
use crate::net::{Fetcher, HttpFetcher};
use crate::strategy::{FetchOutcome, StrategyEngine};

static GLOBAL: OnceLock<Arc<Worker>> = OnceLock::new();

/// Names of the platform events the worker registers a handler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Sync,
    PeriodicSync,
    Push,
    NotificationClick,
    Message,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Sync,
        EventKind::PeriodicSync,
        EventKind::Push,
        EventKind::NotificationClick,
        EventKind::Message,
        EventKind::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Sync => "sync",
            EventKind::PeriodicSync => "periodicsync",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
            EventKind::Message => "message",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown event name: {}", s))
    }
}

/// A platform event with its payload.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
    PeriodicSync { tag: String },
    Push { payload: Option<String> },
    NotificationClick { tag: String, action: Option<String> },
    Message {
        data: Value,
        reply: Option<oneshot::Sender<Value>>,
    },
    /// An error raised somewhere in the host context
    Error { message: String },
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Sync { .. } => EventKind::Sync,
            WorkerEvent::PeriodicSync { .. } => EventKind::PeriodicSync,
            WorkerEvent::Push { .. } => EventKind::Push,
            WorkerEvent::NotificationClick { .. } => EventKind::NotificationClick,
            WorkerEvent::Message { .. } => EventKind::Message,
            WorkerEvent::Error { .. } => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    Fetch(FetchOutcome),
    /// Records synchronized, `None` if the task did not complete
    Synced(Option<usize>),
    Refreshed(bool),
    Pushed(Option<Notification>),
    Clicked(Option<OpenOutcome>),
    Message(MessageOutcome),
    Logged,
    /// The handler failed; the error was logged at the top level
    Failed(String),
}

/// Result of a dispatch plus the episode holding any work still running.
pub struct Dispatched {
    pub outcome: EventOutcome,
    pub episode: Episode,
}

pub struct WorkerBuilder {
    config: WorkerConfig,
    storage: Option<Arc<CacheStorage>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    record_store: Arc<dyn PendingRecordStore>,
    processor: Arc<dyn RecordProcessor>,
    presenter: Arc<dyn NotificationPresenter>,
}

impl WorkerBuilder {
    pub fn storage(mut self, storage: Arc<CacheStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn record_store(mut self, store: Arc<dyn PendingRecordStore>) -> Self {
        self.record_store = store;
        self
    }

    pub fn processor(mut self, processor: Arc<dyn RecordProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn NotificationPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Wire every component. Defaults: in-memory storage, HTTP fetcher.
    pub fn build(self) -> Result<Worker> {
        let config = self.config;
        config.validate().context("Invalid worker configuration")?;

        let storage = self.storage.unwrap_or_else(|| Arc::new(CacheStorage::in_memory()));
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpFetcher::new(Duration::from_secs(config.request_timeout_secs))
                    .context("Failed to create HTTP client")?,
            ),
        };
        let clients = Arc::new(Clients::new());

        let engine = StrategyEngine::new(&config, Arc::clone(&storage), Arc::clone(&fetcher))?;
        let lifecycle = Arc::new(Lifecycle::new(
            &config,
            Arc::clone(&storage),
            Arc::clone(&fetcher),
            Arc::clone(&clients),
        )?);
        let runner = BackgroundRunner::new(
            &config,
            Arc::clone(&storage),
            Arc::clone(&fetcher),
            Arc::clone(&clients),
            self.record_store,
            self.processor,
        )?;
        let messaging = MessagingEndpoint::new(
            &config,
            Arc::clone(&storage),
            Arc::clone(&lifecycle),
            Arc::clone(&clients),
            self.presenter,
        )?;

        Ok(Worker {
            episode_timeout: Duration::from_secs(config.episode_timeout_secs),
            config,
            storage,
            clients,
            lifecycle,
            engine,
            runner,
            messaging,
        })
    }
}

pub struct Worker {
    config: WorkerConfig,
    storage: Arc<CacheStorage>,
    clients: Arc<Clients>,
    lifecycle: Arc<Lifecycle>,
    engine: StrategyEngine,
    runner: BackgroundRunner,
    messaging: MessagingEndpoint,
    episode_timeout: Duration,
}

impl Worker {
    pub fn builder(config: WorkerConfig) -> WorkerBuilder {
        WorkerBuilder {
            config,
            storage: None,
            fetcher: None,
            record_store: Arc::new(EmptyPendingStore),
            processor: Arc::new(NoopProcessor),
            presenter: Arc::new(LogPresenter),
        }
    }

    /// Make `worker` the process-wide context. The first registration wins
    /// and is never torn down; later calls return the existing context.
    pub fn register(worker: Worker) -> Arc<Worker> {
        if let Some(existing) = GLOBAL.get() {
            warn!("Worker already registered, keeping the existing context");
            return Arc::clone(existing);
        }
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(worker)))
    }

    pub fn global() -> Option<Arc<Worker>> {
        GLOBAL.get().cloned()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub fn clients(&self) -> &Arc<Clients> {
        &self.clients
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn messaging(&self) -> &MessagingEndpoint {
        &self.messaging
    }

    /// Route `event` to its handler. Never fails and never panics outward.
    pub async fn dispatch(&self, event: WorkerEvent) -> Dispatched {
        let episode = Episode::new();
        let kind = event.kind();
        debug!(event = %kind, "Dispatching event");

        let handled = AssertUnwindSafe(self.handle(event, &episode)).catch_unwind().await;
        let outcome = match handled {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(event = %kind, error = %format!("{:#}", e), "Unhandled error in event handler");
                EventOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                error!(event = %kind, panic = %message, "Event handler panicked");
                EventOutcome::Failed(message)
            }
        };

        Dispatched { outcome, episode }
    }

    /// Dispatch and wait for the episode's background work, up to the configured timeout.
    pub async fn dispatch_and_settle(&self, event: WorkerEvent) -> EventOutcome {
        let dispatched = self.dispatch(event).await;
        dispatched.episode.settle(self.episode_timeout).await;
        dispatched.outcome
    }

    async fn handle(&self, event: WorkerEvent, episode: &Episode) -> Result<EventOutcome> {
        match event {
            WorkerEvent::Install => self.on_install().await,
            WorkerEvent::Activate => Ok(self.on_activate().await),
            WorkerEvent::Fetch(request) => Ok(self.on_fetch(&request, episode).await),
            WorkerEvent::Sync { tag } => Ok(self.on_sync(&tag).await),
            WorkerEvent::PeriodicSync { tag } => Ok(self.on_periodic_sync(&tag).await),
            WorkerEvent::Push { payload } => Ok(self.on_push(payload.as_deref()).await),
            WorkerEvent::NotificationClick { tag, action } => {
                Ok(self.on_notification_click(&tag, action.as_deref()).await)
            }
            WorkerEvent::Message { data, reply } => Ok(self.on_message(data, reply).await),
            WorkerEvent::Error { message } => Ok(self.on_error(&message)),
        }
    }

    pub async fn on_install(&self) -> Result<EventOutcome> {
        let report = self.lifecycle.install().await.context("Install failed")?;
        Ok(EventOutcome::Installed(report))
    }

    pub async fn on_activate(&self) -> EventOutcome {
        EventOutcome::Activated(self.lifecycle.activate().await)
    }

    pub async fn on_fetch(&self, request: &Request, episode: &Episode) -> EventOutcome {
        EventOutcome::Fetch(self.engine.handle(request, episode).await)
    }

    pub async fn on_sync(&self, tag: &str) -> EventOutcome {
        EventOutcome::Synced(self.runner.on_sync(tag).await)
    }

    pub async fn on_periodic_sync(&self, tag: &str) -> EventOutcome {
        EventOutcome::Refreshed(self.runner.on_periodic_sync(tag).await)
    }

    pub async fn on_push(&self, payload: Option<&str>) -> EventOutcome {
        EventOutcome::Pushed(self.messaging.on_push(payload).await)
    }

    pub async fn on_notification_click(&self, tag: &str, action: Option<&str>) -> EventOutcome {
        EventOutcome::Clicked(self.messaging.on_notification_click(tag, action).await)
    }

    pub async fn on_message(&self, data: Value, reply: Option<oneshot::Sender<Value>>) -> EventOutcome {
        EventOutcome::Message(self.messaging.on_message(data, reply).await)
    }

    pub fn on_error(&self, message: &str) -> EventOutcome {
        error!(error = %message, "Uncaught error in worker context");
        EventOutcome::Logged
    }

    /// Install, then activate straight away when install asked to skip waiting.
    pub async fn start(&self) -> Result<(InstallReport, Option<ActivateReport>)> {
        let installed = match self.dispatch(WorkerEvent::Install).await.outcome {
            EventOutcome::Installed(report) => report,
            EventOutcome::Failed(message) => anyhow::bail!("Install failed: {}", message),
            other => anyhow::bail!("Unexpected install outcome: {:?}", other),
        };

        if !self.lifecycle.skip_waiting_requested() {
            info!("Install complete, waiting for activation");
            return Ok((installed, None));
        }
        match self.dispatch(WorkerEvent::Activate).await.outcome {
            EventOutcome::Activated(report) => Ok((installed, Some(report))),
            other => anyhow::bail!("Unexpected activate outcome: {:?}", other),
        }
    }
}
