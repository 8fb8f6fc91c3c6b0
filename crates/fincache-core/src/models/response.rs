use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Status text of the synthesized offline response.
pub const OFFLINE_STATUS_TEXT: &str = "Service Unavailable";

/// Body of the synthesized offline response.
pub const OFFLINE_BODY: &str = "Offline - content not available";

/// A full response snapshot: status, headers and body.
///
/// Snapshots are stored and replaced wholesale; nothing edits one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A 200 response with a plain text body.
    pub fn text(body: &str) -> Self {
        Self::new(200, body).with_header("Content-Type", "text/plain")
    }

    /// A 200 response carrying `value` serialized as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(200, body).with_header("Content-Type", "application/json"))
    }

    /// The fixed 503 returned when neither cache nor network can answer.
    pub fn service_unavailable() -> Self {
        Self {
            status: 503,
            status_text: OFFLINE_STATUS_TEXT.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: OFFLINE_BODY.as_bytes().to_vec(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// True for 2xx statuses; only these are written to a partition.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_offline_fallback(&self) -> bool {
        self.status == 503 && self.status_text == OFFLINE_STATUS_TEXT
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
