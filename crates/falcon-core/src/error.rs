//! Engine error taxonomy.
//!
//! Network-class errors (including timeouts) are retryable per segment;
//! filesystem errors and admission errors are not. `Cancelled` is a control
//! signal, not a failure.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FalconError {
    /// URL has no recognizable scheme.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// No registered handler claims the URL's scheme.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Transport failure: DNS, TLS, connection, or HTTP status >= 400.
    #[error("network error: {0}")]
    Network(String),

    /// A single handler network call exceeded the per-request timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Temp/output creation, write, rename, or merge failed.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// Cooperative cancellation observed; the task ends `Cancelled`.
    #[error("cancelled")]
    Cancelled,
}

impl FalconError {
    /// True for errors the segmented downloader may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FalconError::Network(_) | FalconError::Timeout(_))
    }
}

impl From<io::Error> for FalconError {
    fn from(e: io::Error) -> Self {
        FalconError::Filesystem(e.to_string())
    }
}

/// Maps a curl transport error onto the taxonomy. Callback aborts are the
/// cancellation/pause path; the caller decides which by inspecting the task.
pub(crate) fn classify_curl_error(e: &curl::Error) -> FalconError {
    if e.is_aborted_by_callback() {
        return FalconError::Cancelled;
    }
    if e.is_operation_timedout() {
        return FalconError::Timeout(e.to_string());
    }
    FalconError::Network(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(FalconError::Network("reset".into()).is_retryable());
        assert!(FalconError::Timeout("slow".into()).is_retryable());
    }

    #[test]
    fn filesystem_and_cancel_are_not_retryable() {
        assert!(!FalconError::Filesystem("disk full".into()).is_retryable());
        assert!(!FalconError::Cancelled.is_retryable());
        assert!(!FalconError::InvalidUrl("x".into()).is_retryable());
    }

    #[test]
    fn io_error_converts_to_filesystem() {
        let e: FalconError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(e, FalconError::Filesystem(_)));
    }
}
