use std::io;

use thiserror::Error;

/// Mediaron global error type.
///
/// Every variant carries its context as an owned string so errors stay `Clone`:
/// a coalesced execution delivers the same failure to every joined caller.
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Media not found: {0}")]
    NotFound(String),

    #[error("Media is quarantined: {0}")]
    Quarantined(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Media exceeds size limit: {0}")]
    SizeLimit(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    BadConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may reasonably retry the request later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_) | Error::StorageUnavailable(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}

/// Mediaron global result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = Error::NotFound("example.com/abc".to_owned());
        assert!(error.to_string().contains("Media not found"));
        assert!(error.to_string().contains("example.com/abc"));
    }

    #[test]
    fn test_io_error_maps_to_storage_unavailable() {
        let error: Error = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert!(matches!(error, Error::StorageUnavailable(_)));
        assert!(error.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(Error::UpstreamUnavailable("502".to_owned()).is_retriable());
        assert!(Error::StorageUnavailable("io".to_owned()).is_retriable());
        assert!(!Error::NotFound("x".to_owned()).is_retriable());
        assert!(!Error::Quarantined("x".to_owned()).is_retriable());
        assert!(!Error::Cancelled.is_retriable());
    }

    #[test]
    fn test_errors_are_cloneable() {
        let error = Error::Quarantined("example.com/abc".to_owned());
        let copy = error.clone();
        assert_eq!(error.to_string(), copy.to_string());
    }
}
