//! Envelopes exchanged between foreground application instances and the worker.
//!
//! Inbound messages are loose `{type, data}` envelopes; they are parsed into
//! a `Command` so unknown types can be logged and dropped instead of failing
//! deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SKIP_WAITING: &str = "SKIP_WAITING";
pub const CACHE_TRANSACTION: &str = "CACHE_TRANSACTION";
pub const GET_CACHE_STATUS: &str = "GET_CACHE_STATUS";

/// Raw `{type, data}` envelope as posted by the foreground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }
}

/// A recognized (or explicitly unrecognized) inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SkipWaiting,
    /// Transaction payload to store verbatim
    CacheTransaction(Value),
    GetCacheStatus,
    /// Any other type; logged and ignored
    Unknown(String),
}

impl From<Envelope> for Command {
    fn from(envelope: Envelope) -> Self {
        match envelope.kind.as_str() {
            SKIP_WAITING => Command::SkipWaiting,
            CACHE_TRANSACTION => Command::CacheTransaction(envelope.data),
            GET_CACHE_STATUS => Command::GetCacheStatus,
            _ => Command::Unknown(envelope.kind),
        }
    }
}

/// Snapshot of the partition universe returned for `GET_CACHE_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CacheStatus {
    /// Number of partitions
    pub caches: usize,
    /// Total entries across all partitions
    pub size: usize,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub last_updated: DateTime<Utc>,
}

/// Reply to `GET_CACHE_STATUS`: either the status or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum StatusReply {
    Status(CacheStatus),
    Error { error: String },
}

/// Events broadcast from the worker to every connected foreground context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ServerMessage {
    #[serde(rename = "SYNC_COMPLETE")]
    SyncComplete { count: usize },
}
