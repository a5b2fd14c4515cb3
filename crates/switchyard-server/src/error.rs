//! Unified error handling for the API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use switchyard_core::{AgentError, ResolutionError};

/// API error response body
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    /// The agent loop failed; the partial state is dropped here.
    Resolution(ResolutionError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND".to_string(), msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST".to_string(), msg),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                msg,
            ),
            AppError::Resolution(err) => (
                resolution_status(&err.source),
                err.source.error_code().to_ascii_uppercase(),
                err.to_string(),
            ),
        };

        (status, Json(ApiError { error: message, code })).into_response()
    }
}

fn resolution_status(err: &AgentError) -> StatusCode {
    match err {
        AgentError::DelegationDepthExceeded { .. } => StatusCode::BAD_REQUEST,
        AgentError::Completion(_) | AgentError::MalformedStream { .. } => StatusCode::BAD_GATEWAY,
        AgentError::UnknownCapability { .. } | AgentError::RoundLimitExceeded { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

impl From<ResolutionError> for AppError {
    fn from(err: ResolutionError) -> Self {
        AppError::Resolution(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ConversationState;

    #[test]
    fn test_status_codes() {
        let response = AppError::NotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::Resolution(ResolutionError {
            source: AgentError::DelegationDepthExceeded { depth: 5, max: 4 },
            partial_state: ConversationState::new(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::Resolution(ResolutionError {
            source: AgentError::RoundLimitExceeded { rounds: 25 },
            partial_state: ConversationState::new(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
