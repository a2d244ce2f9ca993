// API error type and its HTTP mapping

use crate::matchmaking::MatchError;
use arena_engine::EngineError;
use arena_engine::sanitize;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::error;

static HARDENED: AtomicBool = AtomicBool::new(false);

/// Replace infrastructure diagnostics with a generic message from now on
pub fn set_hardened(hardened: bool) {
    HARDENED.store(hardened, Ordering::Relaxed);
}

const GENERIC_INFRA_MESSAGE: &str = "Internal error while executing code";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Matchmaking(#[from] MatchError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("problem store: {0}")]
    Store(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Matchmaking(MatchError::PairingTimeout) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Matchmaking(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) if e.is_infrastructure() => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the `error` field of the response body
    pub fn public_message(&self) -> String {
        let internal = self.status() == StatusCode::INTERNAL_SERVER_ERROR;
        if internal && HARDENED.load(Ordering::Relaxed) {
            GENERIC_INFRA_MESSAGE.to_string()
        } else {
            sanitize::for_display(&self.to_string())
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::Store(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(MatchError::InvalidDuel).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(MatchError::PairingTimeout).status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            ApiError::Engine(EngineError::Timeout { limit: Duration::from_secs(1) }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Engine(EngineError::Infrastructure("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_duel_message() {
        assert_eq!(ApiError::from(MatchError::InvalidDuel).public_message(), "Invalid battle or session");
    }

    #[test]
    fn test_compile_diagnostics_are_sanitized_for_display() {
        let err = ApiError::Engine(EngineError::Compile {
            diagnostics: "main.c:1: \x1b[01;31merror\x1b[0m\r\n".into(),
        });
        let message = err.public_message();
        assert!(message.contains("main.c:1:"));
        assert!(!message.contains('\x1b'));
        assert!(!message.contains('\r'));
    }
}
