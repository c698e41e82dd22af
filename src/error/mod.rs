//! Error types shared by discovery, the transfer engine and the runtime adapter

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Flat error taxonomy. Payloads are plain strings so errors can be cloned
/// into job records and transcripts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Request or stream exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Remote host could not be reached
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Image not found locally: {0}")]
    ImageNotFoundLocally(String),
    /// Pagination stopped early; the accumulated items are still usable
    #[error("Pagination stopped after {fetched} items: {cause}")]
    Pagination {
        fetched: usize,
        cause: Box<TransferError>,
    },
    /// Container runtime control plane is unreachable. Fatal for a run.
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Remote API error: {0}")]
    RemoteApi(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl TransferError {
    /// Errors that justify one re-login before giving up on a job
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            TransferError::AuthenticationRequired(_) | TransferError::AccessDenied(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::RuntimeUnavailable(_))
    }

    /// Operator-facing advice printed next to failed jobs
    pub fn hint(&self) -> &'static str {
        match self {
            TransferError::AuthenticationRequired(_) => "check credentials",
            TransferError::AccessDenied(_) => "check repository access",
            TransferError::Timeout(_) | TransferError::Connection(_) => "check network",
            TransferError::ImageNotFoundLocally(_) => "pull the image first",
            TransferError::RuntimeUnavailable(_) => "check that the Docker daemon is running",
            TransferError::Pagination { cause, .. } => cause.hint(),
            _ => "check the transcript for details",
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for TransferError {
    fn from(err: url::ParseError) -> Self {
        TransferError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<bollard::errors::Error> for TransferError {
    fn from(err: bollard::errors::Error) -> Self {
        handlers::RuntimeErrorHandler::handle_runtime_error(err, "runtime call")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_retryable_kinds() {
        assert!(TransferError::AuthenticationRequired("x".into()).is_auth_failure());
        assert!(TransferError::AccessDenied("x".into()).is_auth_failure());
        assert!(!TransferError::Timeout("x".into()).is_auth_failure());
        assert!(!TransferError::RemoteApi("x".into()).is_auth_failure());
    }

    #[test]
    fn pagination_hint_follows_cause() {
        let err = TransferError::Pagination {
            fetched: 3,
            cause: Box::new(TransferError::Timeout("slow".into())),
        };
        assert_eq!(err.hint(), "check network");
        assert_eq!(
            err.to_string(),
            "Pagination stopped after 3 items: Timeout: slow"
        );
    }
}
