//! JSON rendering of event outcomes for stdout.

use fincache_core::clients::OpenOutcome;
use fincache_core::messaging::MessageOutcome;
use fincache_core::{EventKind, EventOutcome, FetchOutcome, ResponseSource};
use serde_json::{json, Value};

/// Longest response body echoed back; larger bodies are summarized by size.
const MAX_BODY_ECHO: usize = 256;

fn source_name(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::Stale => "stale",
        ResponseSource::OfflineDocument => "offline-document",
        ResponseSource::Unavailable => "unavailable",
    }
}

fn describe_fetch(outcome: &FetchOutcome) -> Value {
    match outcome {
        FetchOutcome::Passthrough => json!({"passthrough": true}),
        FetchOutcome::Respond { response, source } => {
            let body = if response.body.len() <= MAX_BODY_ECHO {
                json!(response.body_text())
            } else {
                json!(format!("<{} bytes>", response.body.len()))
            };
            json!({
                "source": source_name(*source),
                "status": response.status,
                "statusText": response.status_text,
                "body": body,
            })
        }
    }
}

pub fn describe(kind: EventKind, outcome: &EventOutcome) -> Value {
    let detail = match outcome {
        EventOutcome::Installed(report) => json!({"cached": report.cached, "failed": report.failed}),
        EventOutcome::Activated(report) => json!({"deleted": report.deleted, "claimed": report.claimed}),
        EventOutcome::Fetch(fetch) => describe_fetch(fetch),
        EventOutcome::Synced(count) => json!({"count": count}),
        EventOutcome::Refreshed(ok) => json!({"refreshed": ok}),
        EventOutcome::Pushed(notification) => json!({"notification": notification}),
        EventOutcome::Clicked(opened) => match opened {
            Some(OpenOutcome::Opened(id)) => json!({"opened": id}),
            Some(OpenOutcome::Focused(id)) => json!({"focused": id}),
            None => json!({}),
        },
        EventOutcome::Message(message) => match message {
            MessageOutcome::Handled => json!({"handled": true}),
            // the reply value itself travels over the reply channel
            MessageOutcome::Replied(_) => json!({"replied": true}),
            MessageOutcome::Ignored => json!({"ignored": true}),
        },
        EventOutcome::Logged => json!({"logged": true}),
        EventOutcome::Failed(message) => json!({"error": message}),
    };

    json!({"event": kind.name(), "outcome": detail})
}

#[cfg(test)]
mod tests {
    use super::*;
    use fincache_core::Response;

    #[test]
    fn test_describe_fetch_response() {
        let outcome = EventOutcome::Fetch(FetchOutcome::Respond {
            response: Response::service_unavailable(),
            source: ResponseSource::Unavailable,
        });
        let value = describe(EventKind::Fetch, &outcome);
        assert_eq!(value["event"], "fetch");
        assert_eq!(value["outcome"]["status"], 503);
        assert_eq!(value["outcome"]["source"], "unavailable");
    }

    #[test]
    fn test_large_bodies_are_summarized() {
        let outcome = FetchOutcome::Respond {
            response: Response::new(200, vec![b'x'; 1000]),
            source: ResponseSource::Network,
        };
        assert_eq!(describe_fetch(&outcome)["body"], "<1000 bytes>");
    }

    #[test]
    fn test_describe_failure() {
        let value = describe(EventKind::Install, &EventOutcome::Failed("disk full".to_string()));
        assert_eq!(value["outcome"]["error"], "disk full");
    }
}
