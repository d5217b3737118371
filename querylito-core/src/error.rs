use thiserror::Error;

/// An error produced by a fetcher.
///
/// Errors are stored on cache entries and handed to subscribers, so they are
/// cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The remote answered with a non-2xx status, or the request never got an
    /// answer at all (connection loss, DNS, ...).
    ///
    /// `status` is `None` for network-level failures. `body` holds the
    /// response body when the transport could read one.
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        url: String,
        message: String,
        body: Option<String>,
    },
    /// The response arrived but could not be turned into the expected value.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The caller aborted the request. Never retried and never stored.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// A non-2xx response for a `GET` of `url`.
    pub fn http_status(url: impl Into<String>, status: u16, body: Option<String>) -> Self {
        let url = url.into();
        FetchError::Transport {
            message: format!("GET {url} failed"),
            status: Some(status),
            url,
            body,
        }
    }

    /// A request to `url` that failed below HTTP.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Transport {
            status: None,
            url: url.into(),
            message: message.into(),
            body: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// The HTTP status, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_message() {
        let err = FetchError::http_status("https://example.test/x", 503, None);
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "GET https://example.test/x failed");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_network_error_has_no_status() {
        let err = FetchError::network("https://example.test", "connection reset");
        assert_eq!(err.status(), None);
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_cancelled() {
        assert!(FetchError::Cancelled.is_cancelled());
        assert_eq!(FetchError::Cancelled.status(), None);
    }
}
