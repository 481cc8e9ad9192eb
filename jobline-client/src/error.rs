//! Error types for the jobs client

use jobline_core::domain::rejection::RejectedError;
use thiserror::Error;

use crate::gate::GateError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by a transport before any response is possible
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection is closed
    #[error("Transport is disconnected")]
    Disconnected,

    /// Topic or topic filter is malformed
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Publish was not accepted by the transport
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe was not accepted by the transport
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Errors that can occur during a job exchange
#[derive(Debug, Error)]
pub enum ClientError {
    /// Backend refused the request
    #[error("Request rejected: {0}")]
    Rejected(RejectedError),

    /// Publish or subscribe failed
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The response could not be correlated with the request
    #[error("Correlation failure: {0}")]
    Gate(#[from] GateError),

    /// Failed to serialize the request
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Failed to parse an accepted response
    #[error("Failed to parse response: {0}")]
    Decode(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// The rejection carried by this error, if the backend refused the request
    pub fn rejection(&self) -> Option<&RejectedError> {
        match self {
            Self::Rejected(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error is a rejection by the backend
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Check if the request could succeed when rebuilt from fresh state
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected(err) if err.is_retryable())
    }

    /// Check if this error came from the transport itself
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobline_core::domain::rejection::RejectedErrorCode;

    #[test]
    fn test_error_classification() {
        let mismatch = ClientError::Rejected(RejectedError::new(
            RejectedErrorCode::VersionMismatch,
            "expected version 2",
        ));
        assert!(mismatch.is_rejection());
        assert!(mismatch.is_retryable());
        assert_eq!(
            mismatch.rejection().map(|r| r.code),
            Some(RejectedErrorCode::VersionMismatch)
        );

        let terminal = ClientError::Rejected(RejectedError::new(
            RejectedErrorCode::TerminalStateReached,
            "job-1 already SUCCEEDED",
        ));
        assert!(!terminal.is_retryable());

        let transport = ClientError::from(TransportError::Disconnected);
        assert!(transport.is_transport());
        assert!(!transport.is_rejection());
        assert_eq!(
            transport.to_string(),
            "Transport failure: Transport is disconnected"
        );
    }
}
