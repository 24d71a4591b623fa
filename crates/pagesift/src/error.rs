//! Error taxonomy for the extraction pipeline.
//!
//! Page-level failures (`RetrievalError`, `SiftError::NoContentRegion`) end an
//! invocation. `RenderUnavailable` and `ExtractionFieldMiss` are never
//! propagated: the first becomes a downgrade tag, the second a debug log line.

use std::fmt;

/// Why a page could not be retrieved.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("timed out before the page was retrieved")]
    Timeout,

    #[error("render error: {0}")]
    Render(String),
}

impl RetrievalError {
    /// Short machine-readable kind, used in failure results.
    pub fn kind(&self) -> &'static str {
        match self {
            RetrievalError::InvalidUrl(_) => "invalid_url",
            RetrievalError::Network(_) => "network",
            RetrievalError::Status(_) => "http_status",
            RetrievalError::Timeout => "timeout",
            RetrievalError::Render(_) => "render",
        }
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout
        } else if let Some(status) = err.status() {
            RetrievalError::Status(status.as_u16())
        } else {
            RetrievalError::Network(err.to_string())
        }
    }
}

/// The rendering capability could not serve a `Rendered` request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("renderer unavailable: {0}")]
pub struct RenderUnavailable(pub String);

/// A single field lookup chain found nothing inside a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionFieldMiss {
    pub field: &'static str,
}

impl fmt::Display for ExtractionFieldMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no value for field `{}`", self.field)
    }
}

/// Crate-level error.
#[derive(thiserror::Error, Debug)]
pub enum SiftError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("no content region: {0}")]
    NoContentRegion(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SiftError {
    /// Short machine-readable kind, used in failure results.
    pub fn kind(&self) -> &'static str {
        match self {
            SiftError::Retrieval(e) => e.kind(),
            SiftError::NoContentRegion(_) => "no_content_region",
            SiftError::Config(_) => "config",
            SiftError::Io(_) => "io",
            SiftError::Json(_) => "json",
        }
    }
}

/// Convenience result type.
pub type SiftResult<T> = Result<T, SiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_reads_like_http_status() {
        assert_eq!(RetrievalError::Status(503).to_string(), "http status 503");
        assert_eq!(RetrievalError::Status(503).kind(), "http_status");
    }

    #[test]
    fn sift_error_kind_delegates_to_retrieval() {
        let err: SiftError = RetrievalError::Timeout.into();
        assert_eq!(err.kind(), "timeout");
        assert_eq!(
            SiftError::NoContentRegion("empty".into()).kind(),
            "no_content_region"
        );
    }
}
