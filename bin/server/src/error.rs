//! API error mapping.
//!
//! Engine errors map onto HTTP statuses here; the response body is a JSON
//! envelope with a single `error` message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flowline_engine::EngineError;
use serde_json::json;
use std::fmt;

/// User-visible API errors.
#[derive(Debug)]
pub enum ApiError {
    /// The workflow or execution does not exist (or is inactive).
    NotFound { message: String },
    /// The request or workflow definition is invalid.
    Invalid { message: String },
    /// Everything else.
    Internal { message: String },
}

impl ApiError {
    /// A not-found error with the given message.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// An invalid-request error with the given message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { message }
            | Self::Invalid { message }
            | Self::Internal { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::WorkflowNotFound { .. } | EngineError::ExecutionNotFound { .. } => {
                Self::NotFound {
                    message: err.to_string(),
                }
            }
            EngineError::Configuration { .. } => Self::Invalid {
                message: err.to_string(),
            },
            _ => Self::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
