//! Rejection responses
//!
//! A rejection is the backend refusing a request: bad state, version
//! conflict, unknown job, malformed payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::job::{JobStatus, StatusDetails};

/// Reason code carried by a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectedErrorCode {
    InvalidTopic,
    InvalidJson,
    InvalidRequest,
    InvalidStateTransition,
    ResourceNotFound,
    VersionMismatch,
    InternalError,
    RequestThrottled,
    TerminalStateReached,
}

impl fmt::Display for RejectedErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Execution state echoed back with a version mismatch, so a caller can
/// resynchronize without a separate describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: JobStatus,
    pub version_number: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
}

/// Payload published on a `.../rejected` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedError {
    pub code: RejectedErrorCode,
    pub message: String,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<ExecutionState>,
}

impl RejectedError {
    pub fn new(code: RejectedErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Some(Utc::now()),
            client_token: None,
            execution_state: None,
        }
    }

    pub fn with_client_token(mut self, token: Option<String>) -> Self {
        self.client_token = token;
        self
    }

    pub fn with_execution_state(mut self, state: ExecutionState) -> Self {
        self.execution_state = Some(state);
        self
    }

    /// Version conflicts and throttling can succeed if the request is rebuilt
    /// from fresh state; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            RejectedErrorCode::VersionMismatch | RejectedErrorCode::RequestThrottled
        )
    }
}

impl fmt::Display for RejectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RejectedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        let err = RejectedError::new(RejectedErrorCode::ResourceNotFound, "job-9 not found");
        assert_eq!(err.to_string(), "ResourceNotFound: job-9 not found");
    }

    #[test]
    fn test_only_version_mismatch_and_throttling_are_retryable() {
        assert!(RejectedError::new(RejectedErrorCode::VersionMismatch, "").is_retryable());
        assert!(RejectedError::new(RejectedErrorCode::RequestThrottled, "").is_retryable());
        assert!(!RejectedError::new(RejectedErrorCode::TerminalStateReached, "").is_retryable());
        assert!(!RejectedError::new(RejectedErrorCode::InvalidRequest, "").is_retryable());
    }

    #[test]
    fn test_rejection_parses_minimal_payload() {
        let err: RejectedError = serde_json::from_str(
            r#"{"code":"VersionMismatch","message":"expected 3","clientToken":"abc"}"#,
        )
        .unwrap();

        assert_eq!(err.code, RejectedErrorCode::VersionMismatch);
        assert_eq!(err.client_token.as_deref(), Some("abc"));
        assert!(err.timestamp.is_none());
    }
}
