//! Error types for the sync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetgate_core::CoreError;
use fleetgate_governance::{FinalizeError, VoteError};
use fleetgate_protocol::FrameError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or bad credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Authenticated, but not allowed to do this.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// No such resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// A declared content encoding could not be reversed.
    #[error("undecodable body: {0}")]
    Decode(#[from] FrameError),

    /// A vote was rejected.
    #[error(transparent)]
    Vote(#[from] VoteError),

    /// Finalization failed.
    #[error(transparent)]
    Finalize(#[from] FinalizeError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Decode(_) => StatusCode::BAD_REQUEST,
            ServerError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Vote(VoteError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Vote(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Finalize(FinalizeError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Store(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ServerError::Store(e) if e.is_busy() => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Vote(_)
            | ServerError::Finalize(_)
            | ServerError::Store(_)
            | ServerError::Internal(_)
            | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        // Internal details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::ProposalStatus;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn governance_statuses() {
        let missing = ServerError::from(VoteError::NotFound { proposal_id: 7 });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let closed = ServerError::from(VoteError::InvalidState {
            proposal_id: 7,
            status: ProposalStatus::Approved,
        });
        assert_eq!(closed.status(), StatusCode::BAD_REQUEST);
        assert!(closed.to_string().contains("APPROVED"));

        let store = ServerError::from(CoreError::not_found("rule", 3));
        assert_eq!(store.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServerError::from(CoreError::invalid_data("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn decode_failure_is_bad_request() {
        let err = ServerError::from(FrameError::Malformed("truncated".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
