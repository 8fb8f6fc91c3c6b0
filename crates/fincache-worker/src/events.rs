//! Parsing of host event lines.
//!
//! Each stdin line is one JSON object naming a platform event:
//!
//! ```text
//! {"event": "fetch", "url": "https://cdn.jsdelivr.net/npm/chart.js"}
//! {"event": "fetch", "method": "POST", "url": "https://money.example.com/api/tx"}
//! {"event": "sync", "tag": "sync-transactions"}
//! {"event": "message", "data": {"type": "GET_CACHE_STATUS"}}
//! {"event": "notificationclick", "tag": "fincache-notification", "action": "view"}
//! ```

use std::collections::HashMap;

use anyhow::{Context, Result};
use fincache_core::{EventKind, Method, Request, RequestMode, Url, WorkerEvent};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Deserialize)]
struct EventLine {
    event: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    mode: Option<RequestMode>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

/// A parsed event plus the receiver for its reply, if it expects one.
pub struct ParsedEvent {
    pub event: WorkerEvent,
    pub reply: Option<oneshot::Receiver<Value>>,
}

pub fn parse_line(line: &str) -> Result<ParsedEvent> {
    let line: EventLine = serde_json::from_str(line).context("Event line is not valid JSON")?;
    let kind: EventKind = line.event.parse()?;

    let mut reply = None;
    let event = match kind {
        EventKind::Install => WorkerEvent::Install,
        EventKind::Activate => WorkerEvent::Activate,
        EventKind::Fetch => WorkerEvent::Fetch(fetch_request(&line)?),
        EventKind::Sync => WorkerEvent::Sync {
            tag: line.tag.context("sync event needs a tag")?,
        },
        EventKind::PeriodicSync => WorkerEvent::PeriodicSync {
            tag: line.tag.context("periodicsync event needs a tag")?,
        },
        EventKind::Push => WorkerEvent::Push { payload: line.payload },
        EventKind::NotificationClick => WorkerEvent::NotificationClick {
            tag: line.tag.unwrap_or_default(),
            action: line.action,
        },
        EventKind::Message => {
            let (tx, rx) = oneshot::channel();
            reply = Some(rx);
            WorkerEvent::Message {
                data: line.data,
                reply: Some(tx),
            }
        }
        EventKind::Error => WorkerEvent::Error {
            message: line.message.unwrap_or_else(|| "unknown error".to_string()),
        },
    };

    Ok(ParsedEvent { event, reply })
}

fn fetch_request(line: &EventLine) -> Result<Request> {
    let url = line.url.as_deref().context("fetch event needs a url")?;
    let url: Url = url.parse().with_context(|| format!("Invalid fetch url: {}", url))?;
    let method: Method = line
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_uppercase()
        .parse()
        .context("Invalid HTTP method")?;

    let mut request = Request::new(method, url).with_mode(line.mode.unwrap_or_default());
    for (name, value) in &line.headers {
        request = request.with_header(name, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let parsed = parse_line(
            r#"{"event": "fetch", "url": "https://money.example.com/", "mode": "navigate", "headers": {"Accept": "text/html"}}"#,
        )
        .unwrap();
        match parsed.event {
            WorkerEvent::Fetch(request) => {
                assert_eq!(request.method.as_str(), "GET");
                assert!(request.is_navigation());
                assert_eq!(request.header("accept"), Some("text/html"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(parsed.reply.is_none());
    }

    #[test]
    fn test_parse_post_fetch() {
        let parsed = parse_line(r#"{"event": "fetch", "method": "post", "url": "https://money.example.com/api"}"#).unwrap();
        match parsed.event {
            WorkerEvent::Fetch(request) => assert!(!request.is_interceptable()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_message_gets_reply_channel() {
        let parsed = parse_line(r#"{"event": "message", "data": {"type": "GET_CACHE_STATUS"}}"#).unwrap();
        assert!(parsed.reply.is_some());
        assert!(matches!(parsed.event, WorkerEvent::Message { reply: Some(_), .. }));
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"event": "teleport"}"#).is_err());
        assert!(parse_line(r#"{"event": "fetch"}"#).is_err());
        assert!(parse_line(r#"{"event": "sync"}"#).is_err());
    }
}
