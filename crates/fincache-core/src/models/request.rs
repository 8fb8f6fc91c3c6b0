use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// How the request was issued by the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level document navigation
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// An intercepted network request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: RequestMode::default(),
            headers: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A GET issued as a document navigation.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_mode(RequestMode::Navigate)
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Only GET over http(s) is ever intercepted.
    pub fn is_interceptable(&self) -> bool {
        self.method == Method::GET && matches!(self.url.scheme(), "http" | "https")
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
            || self
                .header("accept")
                .map(|accept| accept.contains("text/html"))
                .unwrap_or(false)
    }

    /// Partition key for this request: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_only_get_http_is_interceptable() {
        assert!(Request::get(url("https://app.example.com/")).is_interceptable());
        assert!(Request::get(url("http://app.example.com/a.js")).is_interceptable());
        assert!(!Request::new(Method::POST, url("https://app.example.com/api")).is_interceptable());
        assert!(!Request::get(url("chrome-extension://abc/script.js")).is_interceptable());
        assert!(!Request::get(url("data:text/plain,hello")).is_interceptable());
    }

    #[test]
    fn test_navigation_detection() {
        assert!(Request::navigate(url("https://app.example.com/")).is_navigation());

        let html = Request::get(url("https://app.example.com/report"))
            .with_header("Accept", "text/html,application/xhtml+xml");
        assert!(html.is_navigation());

        let script = Request::get(url("https://app.example.com/app.js"));
        assert!(!script.is_navigation());
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let req = Request::get(url("https://app.example.com/index.html#budget"));
        assert_eq!(req.cache_key(), "https://app.example.com/index.html");
    }
}
