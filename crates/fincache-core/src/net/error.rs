use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),

    #[error("Network unavailable: {0}")]
    Unavailable(String),
}

/// Maximum length for URLs quoted in error messages
const MAX_ERROR_URL_LENGTH: usize = 200;

impl FetchError {
    /// Truncate a URL to avoid logging excessive data
    pub(crate) fn truncate_url(url: &str) -> String {
        if url.len() <= MAX_ERROR_URL_LENGTH {
            url.to_string()
        } else {
            let cut: String = url.chars().take(MAX_ERROR_URL_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, url.len())
        }
    }

    /// Classify a reqwest failure, keeping timeouts distinct.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(Self::truncate_url(url))
        } else {
            FetchError::Network(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_url() {
        let short = "https://cdn.jsdelivr.net/npm/chart.js";
        assert_eq!(FetchError::truncate_url(short), short);

        let long = format!("https://example.com/{}", "a".repeat(400));
        let truncated = FetchError::truncate_url(&long);
        assert!(truncated.contains("truncated"));
        assert!(truncated.len() < long.len());
    }
}
