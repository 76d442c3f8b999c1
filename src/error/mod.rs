//! Error types for catalog aggregation

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors surfaced by registry clients and the aggregator.
///
/// Failures are scoped as narrowly as possible: a `Parse` on one manifest
/// skips that item, a `Network` on one repository marks only that repository,
/// and nothing here is fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Transient transport failure; retried with bounded backoff
    #[error("network error: {0}")]
    Network(String),
    /// Credentials rejected or token exchange failed; requires reconfiguration
    #[error("authentication error: {0}")]
    Auth(String),
    /// Repository, tag, or manifest absent
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed server or CLI payload; the offending item is skipped
    #[error("parse error: {0}")]
    Parse(String),
    /// No usable local container runtime; renders as an empty source
    #[error("local runtime unavailable: {0}")]
    LocalUnavailable(String),
    /// Persisted configuration unreadable or corrupt
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The fetch generation was superseded; the result must be discarded
    #[error("fetch superseded: {0}")]
    Cancelled(String),
}

impl CatalogError {
    /// Only transport-level failures are worth an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Network(_))
    }

    /// Map a non-2xx registry response onto the error taxonomy.
    pub fn from_status(status: StatusCode, operation: &str) -> Self {
        match status.as_u16() {
            401 | 403 => CatalogError::Auth(format!(
                "registry rejected {} (status {})",
                operation, status
            )),
            404 => CatalogError::NotFound(format!("{} returned 404", operation)),
            429 => CatalogError::Network(format!("rate limited during {}", operation)),
            _ => CatalogError::Network(format!("{} failed with status {}", operation, status)),
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CatalogError::Parse(err.to_string())
        } else {
            CatalogError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for CatalogError {
    fn from(err: url::ParseError) -> Self {
        CatalogError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CatalogError::Network("reset".into()).is_retryable());
        assert!(!CatalogError::Auth("rejected".into()).is_retryable());
        assert!(!CatalogError::NotFound("gone".into()).is_retryable());
        assert!(!CatalogError::Cancelled("stale".into()).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let err = CatalogError::from_status(StatusCode::NOT_FOUND, "tag list");
        assert!(matches!(err, CatalogError::NotFound(_)));

        let err = CatalogError::from_status(StatusCode::FORBIDDEN, "catalog");
        assert!(matches!(err, CatalogError::Auth(_)));

        let err = CatalogError::from_status(StatusCode::BAD_GATEWAY, "catalog");
        assert!(matches!(err, CatalogError::Network(_)));
    }
}
