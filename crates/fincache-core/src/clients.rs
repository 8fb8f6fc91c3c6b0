//! Registry of connected foreground contexts.
//!
//! Each foreground application instance connects with its URL and receives a
//! channel on which broadcasts (`SYNC_COMPLETE`) arrive. The registry also
//! implements takeover (`claim`) and the open-or-focus behavior used by
//! notification clicks.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::models::ServerMessage;

/// Buffer size for each client's broadcast channel.
/// Broadcasts are rare (one per completed sync), 16 leaves plenty of headroom.
const CLIENT_CHANNEL_BUFFER_SIZE: usize = 16;

pub type ClientId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: String,
    /// Whether this worker controls the client's requests
    pub controlled: bool,
    pub focused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Focused(ClientId),
    Opened(ClientId),
}

struct ClientEntry {
    info: ClientInfo,
    sink: Option<mpsc::Sender<ServerMessage>>,
}

#[derive(Default)]
pub struct Clients {
    next_id: AtomicU64,
    entries: RwLock<Vec<ClientEntry>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a foreground context. It stays uncontrolled until the next `claim`.
    pub async fn connect(&self, url: &str) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_BUFFER_SIZE);
        let id = self.allocate_id();
        self.entries.write().await.push(ClientEntry {
            info: ClientInfo {
                id,
                url: url.to_string(),
                controlled: false,
                focused: false,
            },
            sink: Some(tx),
        });
        debug!(client = id, url = url, "Client connected");
        (id, rx)
    }

    pub async fn disconnect(&self, id: ClientId) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.info.id != id);
        entries.len() != before
    }

    /// Take control of every open context without a reload.
    /// Returns the number of contexts newly claimed.
    pub async fn claim(&self) -> usize {
        let mut entries = self.entries.write().await;
        let mut claimed = 0;
        for entry in entries.iter_mut().filter(|e| !e.info.controlled) {
            entry.info.controlled = true;
            claimed += 1;
        }
        info!(claimed = claimed, total = entries.len(), "Clients claimed");
        claimed
    }

    pub async fn match_all(&self) -> Vec<ClientInfo> {
        self.entries.read().await.iter().map(|e| e.info.clone()).collect()
    }

    /// Post `message` to every connected context. Closed channels are pruned.
    /// Returns the number of contexts the message was delivered to.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut entries = self.entries.write().await;
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in entries.iter() {
            let Some(ref sink) = entry.sink else {
                continue;
            };
            match sink.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = entry.info.id, "Client channel full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(entry.info.id),
            }
        }

        if !closed.is_empty() {
            entries.retain(|e| !closed.contains(&e.info.id));
            debug!(count = closed.len(), "Pruned closed clients");
        }
        delivered
    }

    /// Focus a context already showing `url`, or open a new one there.
    pub async fn open_or_focus(&self, url: &str) -> OpenOutcome {
        let mut entries = self.entries.write().await;
        let existing = entries.iter().position(|e| e.info.url == url);

        for entry in entries.iter_mut() {
            entry.info.focused = false;
        }

        match existing {
            Some(index) => {
                entries[index].info.focused = true;
                OpenOutcome::Focused(entries[index].info.id)
            }
            None => {
                let id = self.allocate_id();
                entries.push(ClientEntry {
                    info: ClientInfo {
                        id,
                        url: url.to_string(),
                        controlled: true,
                        focused: true,
                    },
                    sink: None,
                });
                info!(client = id, url = url, "Opened new window");
                OpenOutcome::Opened(id)
            }
        }
    }
}
