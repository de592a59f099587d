//! Proxy error taxonomy.

use std::time::Duration;

/// Failures that can occur while proxying one account's traffic.
///
/// Every variant is contained at the connection boundary: it becomes an HTTP
/// status for the client and, on streaming and interception paths, a `done`
/// publish. None of them take a listener down.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    // Upstream
    /// The backend could not be reached or dropped the connection.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    /// The backend answered with something unusable.
    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    // Detection
    /// No completion marker arrived before the watchdog deadline.
    #[error("completion not detected within {0:?}")]
    DetectionTimeout(Duration),

    // Sync
    /// An install/build/restart step failed.
    #[error("{step} failed: {detail}")]
    WatcherBuildFailure {
        /// Which step (`install`, `build`, `restart`).
        step: String,
        /// Captured error output.
        detail: String,
    },

    // Client
    /// The inbound request could not be forwarded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The inbound body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    // Setup
    /// The shared upstream client could not be built.
    #[error("http client setup failed: {0}")]
    ClientSetup(String),
}

impl ProxyError {
    /// HTTP status to answer the client with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UpstreamUnreachable(_) | Self::MalformedUpstreamResponse(_) => 502,
            Self::DetectionTimeout(_) => 504,
            Self::WatcherBuildFailure { .. } | Self::ClientSetup(_) => 500,
            Self::InvalidRequest(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
        }
    }

    /// Whether the failure originated at the backend.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnreachable(_) | Self::MalformedUpstreamResponse(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::MalformedUpstreamResponse(_) => "malformed_upstream_response",
            Self::DetectionTimeout(_) => "detection_timeout",
            Self::WatcherBuildFailure { .. } => "watcher_build_failure",
            Self::InvalidRequest(_) => "invalid_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::ClientSetup(_) => "client_setup",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn upstream_failures_map_to_bad_gateway() {
        assert_eq!(ProxyError::UpstreamUnreachable("refused".into()).status_code(), 502);
        assert_eq!(
            ProxyError::MalformedUpstreamResponse("truncated".into()).status_code(),
            502
        );
    }

    #[test]
    fn client_failures_map_to_4xx() {
        assert_eq!(ProxyError::InvalidRequest("bad uri".into()).status_code(), 400);
        assert_eq!(ProxyError::PayloadTooLarge { limit: 10 }.status_code(), 413);
    }

    #[test]
    fn upstream_classification() {
        assert!(ProxyError::UpstreamUnreachable(String::new()).is_upstream());
        assert!(!ProxyError::DetectionTimeout(Duration::from_secs(120)).is_upstream());
        assert!(!ProxyError::InvalidRequest(String::new()).is_upstream());
    }

    #[test]
    fn error_kinds_are_snake_case() {
        let errs = [
            ProxyError::UpstreamUnreachable(String::new()),
            ProxyError::MalformedUpstreamResponse(String::new()),
            ProxyError::DetectionTimeout(Duration::ZERO),
            ProxyError::WatcherBuildFailure {
                step: "build".into(),
                detail: String::new(),
            },
            ProxyError::InvalidRequest(String::new()),
            ProxyError::PayloadTooLarge { limit: 1 },
            ProxyError::ClientSetup(String::new()),
        ];
        for e in errs {
            assert!(e.error_kind().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn build_failure_display_names_step() {
        let e = ProxyError::WatcherBuildFailure {
            step: "build".into(),
            detail: "error[E0308]".into(),
        };
        assert_eq!(e.to_string(), "build failed: error[E0308]");
        assert_matches!(e, ProxyError::WatcherBuildFailure { .. });
    }
}
