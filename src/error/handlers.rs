//! Standardized mapping of transport, HTTP and runtime failures onto `TransferError`

use crate::error::TransferError;
use reqwest::StatusCode;

/// Standard error handler for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle registry API errors with the operation name as context
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> TransferError {
        match status.as_u16() {
            401 => TransferError::AuthenticationRequired(format!(
                "unauthorized to perform {}: {}",
                operation, error_text
            )),
            403 => TransferError::AccessDenied(format!(
                "insufficient permissions for {}: {}",
                operation, error_text
            )),
            404 => TransferError::RemoteApi(format!(
                "resource not found for {}: {}",
                operation, error_text
            )),
            408 | 504 => TransferError::Timeout(format!(
                "{} timed out (status {}): {}",
                operation, status, error_text
            )),
            429 => TransferError::RemoteApi(format!(
                "rate limited during {}: {}",
                operation, error_text
            )),
            502 | 503 => TransferError::RemoteApi(format!(
                "registry unavailable for {}: {}",
                operation, error_text
            )),
            _ => TransferError::RemoteApi(format!(
                "{} failed (status {}): {}",
                operation, status, error_text
            )),
        }
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> TransferError {
        if error.is_timeout() {
            TransferError::Timeout(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            TransferError::Connection(format!("connection error during {}: {}", context, error))
        } else if error.is_decode() {
            TransferError::Parse(format!("invalid response body for {}: {}", context, error))
        } else if let Some(status) = error.status() {
            HttpErrorHandler::handle_registry_error(status, &error.to_string(), context)
        } else {
            TransferError::Unexpected(format!("{} network error: {}", context, error))
        }
    }
}

/// Classifies the free-form `error` text found in push and pull streams
pub struct PushErrorClassifier;

impl PushErrorClassifier {
    pub fn classify(message: &str) -> TransferError {
        let lower = message.to_lowercase();
        let text = message.to_string();

        if lower.contains("authentication required")
            || lower.contains("not authenticated")
            || lower.contains("unauthorized")
            || lower.contains("no basic auth credentials")
        {
            TransferError::AuthenticationRequired(text)
        } else if lower.contains("denied") || lower.contains("forbidden") {
            TransferError::AccessDenied(text)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            TransferError::Timeout(text)
        } else if lower.contains("connection refused")
            || lower.contains("no such host")
            || lower.contains("connection reset")
            || lower.contains("network is unreachable")
        {
            TransferError::Connection(text)
        } else if lower.contains("no such image") || lower.contains("does not exist locally") {
            TransferError::ImageNotFoundLocally(text)
        } else {
            TransferError::RemoteApi(text)
        }
    }
}

/// Maps Docker Engine API failures
pub struct RuntimeErrorHandler;

impl RuntimeErrorHandler {
    pub fn handle_runtime_error(error: bollard::errors::Error, context: &str) -> TransferError {
        match error {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => match status_code {
                404 => TransferError::ImageNotFoundLocally(message),
                401 => TransferError::AuthenticationRequired(message),
                403 => TransferError::AccessDenied(message),
                _ => PushErrorClassifier::classify(&format!(
                    "{} failed (status {}): {}",
                    context, status_code, message
                )),
            },
            bollard::errors::Error::RequestTimeoutError => {
                TransferError::Timeout(format!("{} timed out", context))
            }
            other => {
                let text = other.to_string();
                let lower = text.to_lowercase();
                if lower.contains("socket")
                    || lower.contains("connect")
                    || lower.contains("no such file")
                {
                    TransferError::RuntimeUnavailable(format!("{}: {}", context, text))
                } else {
                    PushErrorClassifier::classify(&text)
                }
            }
        }
    }
}
