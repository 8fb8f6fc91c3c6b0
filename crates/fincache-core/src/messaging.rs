//! Messaging Endpoint.
//!
//! Handles commands posted by foreground contexts, push payloads and
//! notification clicks. Nothing in here raises an error towards the sender:
//! failures become `{error}` replies or log lines.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::clients::{Clients, OpenOutcome};
use crate::config::{ConfigError, WorkerConfig};
use crate::lifecycle::Lifecycle;
use crate::models::notification::ACTION_VIEW;
use crate::models::{CacheStatus, Command, Envelope, Notification, Response, StatusReply};

/// Upper bound on computing a cache status reply.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of the synthetic key a cached transaction is stored under.
const TRANSACTION_KEY_PREFIX: &str = "/api/transactions/";

/// Platform notification surface.
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<()>;
    async fn close(&self, tag: &str) -> Result<()>;
}

/// Presenter that only logs; used when the host has no notification surface.
#[derive(Debug, Default)]
pub struct LogPresenter;

#[async_trait]
impl NotificationPresenter for LogPresenter {
    async fn show(&self, notification: &Notification) -> Result<()> {
        info!(title = %notification.title, body = %notification.body, "Notification shown");
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<()> {
        debug!(tag = tag, "Notification closed");
        Ok(())
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Handled,
    Replied(Value),
    Ignored,
}

/// Synthetic key a transaction payload is cached under, from its `id`.
pub fn transaction_key(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(id) if !id.is_empty() => Some(format!("{}{}", TRANSACTION_KEY_PREFIX, id)),
        Value::Number(id) => Some(format!("{}{}", TRANSACTION_KEY_PREFIX, id)),
        _ => None,
    }
}

pub struct MessagingEndpoint {
    storage: Arc<CacheStorage>,
    lifecycle: Arc<Lifecycle>,
    clients: Arc<Clients>,
    presenter: Arc<dyn NotificationPresenter>,
    dynamic_cache: String,
    root_url: String,
    notification_title: String,
    notification_icon: String,
    notification_badge: String,
    status_timeout: Duration,
}

impl MessagingEndpoint {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<CacheStorage>,
        lifecycle: Arc<Lifecycle>,
        clients: Arc<Clients>,
        presenter: Arc<dyn NotificationPresenter>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            storage,
            lifecycle,
            clients,
            presenter,
            dynamic_cache: config.dynamic_cache_name(),
            root_url: config.resolve("/")?.into(),
            notification_title: config.notification_title.clone(),
            notification_icon: config.notification_icon.clone(),
            notification_badge: config.notification_badge.clone(),
            status_timeout: STATUS_TIMEOUT,
        })
    }

    /// Bound on computing a `GET_CACHE_STATUS` reply.
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    /// Handle a raw `{type, data}` message from a foreground context.
    pub async fn on_message(&self, raw: Value, reply: Option<oneshot::Sender<Value>>) -> MessageOutcome {
        let envelope: Envelope = match serde_json::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                return MessageOutcome::Ignored;
            }
        };

        match Command::from(envelope) {
            Command::SkipWaiting => {
                self.lifecycle.skip_waiting().await;
                MessageOutcome::Handled
            }
            Command::CacheTransaction(data) => self.cache_transaction(data).await,
            Command::GetCacheStatus => {
                let value = self.status_reply().await;
                match reply {
                    Some(reply) => {
                        if reply.send(value.clone()).is_err() {
                            debug!("Status requester went away before the reply");
                        }
                    }
                    None => warn!("GET_CACHE_STATUS without a reply channel"),
                }
                MessageOutcome::Replied(value)
            }
            Command::Unknown(kind) => {
                info!(message_type = %kind, "Ignoring unknown message type");
                MessageOutcome::Ignored
            }
        }
    }

    async fn cache_transaction(&self, data: Value) -> MessageOutcome {
        let Some(key) = transaction_key(&data) else {
            warn!("CACHE_TRANSACTION without a usable id");
            return MessageOutcome::Ignored;
        };

        let response = match Response::json(&data) {
            Ok(response) => response,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode transaction");
                return MessageOutcome::Ignored;
            }
        };
        match self.storage.put(&self.dynamic_cache, &key, response).await {
            Ok(()) => {
                debug!(key = %key, "Transaction cached");
                MessageOutcome::Handled
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to cache transaction");
                MessageOutcome::Ignored
            }
        }
    }

    /// Partition count, total entries and newest write time.
    pub async fn cache_status(&self) -> Result<CacheStatus> {
        let compute = async {
            let caches = self.storage.keys().await.len();
            let size = self.storage.entry_count().await;
            let last_updated = self.storage.last_updated().await.unwrap_or_else(Utc::now);
            CacheStatus {
                caches,
                size,
                last_updated,
            }
        };
        tokio::time::timeout(self.status_timeout, compute)
            .await
            .map_err(|_| anyhow::anyhow!("Timed out reading cache status"))
    }

    async fn status_reply(&self) -> Value {
        let reply = match self.cache_status().await {
            Ok(status) => StatusReply::Status(status),
            Err(e) => StatusReply::Error { error: e.to_string() },
        };
        serde_json::to_value(&reply).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }

    /// Present the notification for a push payload.
    pub async fn on_push(&self, payload: Option<&str>) -> Option<Notification> {
        let notification = Notification::for_push(
            &self.notification_title,
            payload.unwrap_or_default(),
            &self.notification_icon,
            &self.notification_badge,
        );
        match self.presenter.show(&notification).await {
            Ok(()) => Some(notification),
            Err(e) => {
                warn!(error = %e, "Failed to show notification");
                None
            }
        }
    }

    /// Close the clicked notification, then open or focus the app for `view`.
    pub async fn on_notification_click(&self, tag: &str, action: Option<&str>) -> Option<OpenOutcome> {
        if let Err(e) = self.presenter.close(tag).await {
            warn!(tag = tag, error = %e, "Failed to close notification");
        }

        match action {
            Some(ACTION_VIEW) => Some(self.clients.open_or_focus(&self.root_url).await),
            other => {
                debug!(action = ?other, "Notification dismissed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MatchScope;
    use crate::lifecycle::LifecycleState;
    use crate::testing::StubFetcher;
    use serde_json::json;
    use std::sync::Mutex;

    const ORIGIN: &str = "https://money.example.com";

    #[derive(Default)]
    struct RecordingPresenter {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationPresenter for RecordingPresenter {
        async fn show(&self, notification: &Notification) -> Result<()> {
            self.events.lock().unwrap().push(format!("show:{}", notification.body));
            Ok(())
        }

        async fn close(&self, tag: &str) -> Result<()> {
            self.events.lock().unwrap().push(format!("close:{}", tag));
            Ok(())
        }
    }

    struct Fixture {
        endpoint: MessagingEndpoint,
        storage: Arc<CacheStorage>,
        lifecycle: Arc<Lifecycle>,
        clients: Arc<Clients>,
        presenter: Arc<RecordingPresenter>,
    }

    fn fixture() -> Fixture {
        let config = WorkerConfig {
            origin: ORIGIN.to_string(),
            ..Default::default()
        };
        let storage = Arc::new(CacheStorage::in_memory());
        let clients = Arc::new(Clients::new());
        let lifecycle = Arc::new(
            Lifecycle::new(&config, Arc::clone(&storage), Arc::new(StubFetcher::new()), Arc::clone(&clients))
                .unwrap(),
        );
        let presenter = Arc::new(RecordingPresenter::default());
        let endpoint = MessagingEndpoint::new(
            &config,
            Arc::clone(&storage),
            Arc::clone(&lifecycle),
            Arc::clone(&clients),
            presenter.clone(),
        )
        .unwrap();
        Fixture {
            endpoint,
            storage,
            lifecycle,
            clients,
            presenter,
        }
    }

    #[test]
    fn test_transaction_key() {
        assert_eq!(transaction_key(&json!({"id": "t1"})).as_deref(), Some("/api/transactions/t1"));
        assert_eq!(transaction_key(&json!({"id": 42})).as_deref(), Some("/api/transactions/42"));
        assert_eq!(transaction_key(&json!({"id": ""})), None);
        assert_eq!(transaction_key(&json!({"amount": 1})), None);
        assert_eq!(transaction_key(&json!("t1")), None);
    }

    #[tokio::test]
    async fn test_cache_transaction_roundtrip() {
        let f = fixture();
        let payload = json!({"id": "t1", "amount": 42, "tags": ["food"], "note": null});

        let outcome = f
            .endpoint
            .on_message(json!({"type": "CACHE_TRANSACTION", "data": payload.clone()}), None)
            .await;
        assert_eq!(outcome, MessageOutcome::Handled);

        let entry = f
            .storage
            .lookup(MatchScope::Named("fincache-dynamic-v1"), "/api/transactions/t1")
            .await
            .unwrap();
        let stored: Value = entry.response.json_body().unwrap();
        assert_eq!(stored, payload);
    }

    #[tokio::test]
    async fn test_cache_transaction_without_id_is_ignored() {
        let f = fixture();
        let outcome = f
            .endpoint
            .on_message(json!({"type": "CACHE_TRANSACTION", "data": {"amount": 5}}), None)
            .await;
        assert_eq!(outcome, MessageOutcome::Ignored);
        assert_eq!(f.storage.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_cache_status_empty_then_counts_entries() {
        let f = fixture();
        let (tx, rx) = oneshot::channel();
        f.endpoint.on_message(json!({"type": "GET_CACHE_STATUS"}), Some(tx)).await;
        let reply = rx.await.unwrap();
        assert_eq!(reply["caches"], 0);
        assert_eq!(reply["size"], 0);
        assert!(reply["lastUpdated"].is_string());

        f.storage.put("fincache-static-v1", "a", Response::text("a")).await.unwrap();
        f.storage.put("fincache-dynamic-v1", "b", Response::text("b")).await.unwrap();
        f.storage.put("fincache-dynamic-v1", "c", Response::text("c")).await.unwrap();

        let (tx, rx) = oneshot::channel();
        f.endpoint.on_message(json!({"type": "GET_CACHE_STATUS"}), Some(tx)).await;
        let reply = rx.await.unwrap();
        assert_eq!(reply["caches"], 2);
        assert_eq!(reply["size"], 3);
    }

    #[tokio::test]
    async fn test_cache_status_timeout_replies_with_error() {
        let f = fixture();
        let endpoint = f.endpoint.with_status_timeout(Duration::from_millis(50));
        let _busy = f.storage.lock_partitions().await;

        let (tx, rx) = oneshot::channel();
        let outcome = endpoint.on_message(json!({"type": "GET_CACHE_STATUS"}), Some(tx)).await;
        let reply = rx.await.unwrap();
        assert_eq!(reply, json!({"error": "Timed out reading cache status"}));
        assert_eq!(outcome, MessageOutcome::Replied(reply));
    }

    #[tokio::test]
    async fn test_unknown_type_produces_no_reply() {
        let f = fixture();
        let (tx, rx) = oneshot::channel();
        let outcome = f.endpoint.on_message(json!({"type": "FOO"}), Some(tx)).await;
        assert_eq!(outcome, MessageOutcome::Ignored);
        // Sender dropped without a value
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_message_is_ignored() {
        let f = fixture();
        assert_eq!(f.endpoint.on_message(json!({"data": 1}), None).await, MessageOutcome::Ignored);
        assert_eq!(f.endpoint.on_message(json!("SKIP_WAITING"), None).await, MessageOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_skip_waiting_activates_waiting_install() {
        let f = fixture();
        f.lifecycle.install().await.unwrap();
        assert_eq!(f.lifecycle.state().await, LifecycleState::Installed);

        let outcome = f.endpoint.on_message(json!({"type": "SKIP_WAITING"}), None).await;
        assert_eq!(outcome, MessageOutcome::Handled);
        assert_eq!(f.lifecycle.state().await, LifecycleState::Activated);
    }

    #[tokio::test]
    async fn test_push_shows_notification() {
        let f = fixture();
        let shown = f.endpoint.on_push(Some("Budget exceeded")).await.unwrap();
        assert_eq!(shown.title, "Finance Dashboard");
        assert!(shown.require_interaction);
        assert_eq!(*f.presenter.events.lock().unwrap(), vec!["show:Budget exceeded".to_string()]);
    }

    #[tokio::test]
    async fn test_view_click_closes_then_opens_root() {
        let f = fixture();
        let outcome = f
            .endpoint
            .on_notification_click("fincache-notification", Some("view"))
            .await;
        assert!(matches!(outcome, Some(OpenOutcome::Opened(_))));
        assert_eq!(*f.presenter.events.lock().unwrap(), vec!["close:fincache-notification".to_string()]);

        let windows = f.clients.match_all().await;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].url, "https://money.example.com/");

        // Second click focuses the same window
        let again = f.endpoint.on_notification_click("fincache-notification", Some("view")).await;
        assert_eq!(again, Some(OpenOutcome::Focused(windows[0].id)));
    }

    #[tokio::test]
    async fn test_dismiss_click_only_closes() {
        let f = fixture();
        assert_eq!(f.endpoint.on_notification_click("fincache-notification", Some("dismiss")).await, None);
        assert_eq!(f.endpoint.on_notification_click("fincache-notification", None).await, None);
        assert!(f.clients.match_all().await.is_empty());
        assert_eq!(f.presenter.events.lock().unwrap().len(), 2);
    }
}
