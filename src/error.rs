//! Error types for the MCP operator

use thiserror::Error;

/// Main error type for operator operations
///
/// Spec validation and reference failures are not errors at this level: they
/// are reported through status conditions. This type covers faults talking to
/// the API server and malformed objects handed to the reconciler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for objects the reconciler cannot act on
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A child resource exists but is controlled by another owner
    #[error("ownership conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an ownership conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Returns true if retrying the failed call may succeed
    ///
    /// Optimistic-concurrency conflicts (409), throttling (429), server errors
    /// (5xx) and transport failures are transient. A 404 is transient as well:
    /// an object written moments ago may not be visible yet, and a retried
    /// get-then-write unit re-reads before deciding what to do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(ae)) => {
                matches!(ae.code, 404 | 409 | 429) || ae.code >= 500
            }
            Self::Kube(kube::Error::HyperError(_)) | Self::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} ({code})"),
        reason: reason.to_string(),
        code,
    }))
}
