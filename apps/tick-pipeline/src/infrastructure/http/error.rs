use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::application::services::{ControllerError, IngestionError, TickRejection};

/// API error mapped onto an HTTP status and JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed query or path parameter.
    #[error("{0}")]
    BadRequest(String),

    /// Nothing stored for the requested resource.
    #[error("{0}")]
    NotFound(String),

    /// Body parsed but failed validation.
    #[error("{message}")]
    Unprocessable {
        /// Human readable reason.
        message: String,
        /// Required fields that were absent.
        missing_fields: Vec<String>,
    },

    /// Streaming controller cannot take commands.
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl ApiError {
    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Controller(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Unprocessable { .. } => "validation_failed",
            Self::Controller(_) => "controller_unavailable",
        }
    }
}

impl From<TickRejection> for ApiError {
    fn from(rejection: TickRejection) -> Self {
        let message = rejection.to_string();
        let missing_fields = match rejection {
            TickRejection::MissingFields(fields) => fields,
            _ => Vec::new(),
        };
        Self::Unprocessable {
            message,
            missing_fields,
        }
    }
}

impl From<IngestionError> for ApiError {
    fn from(error: IngestionError) -> Self {
        Self::Unprocessable {
            message: error.to_string(),
            missing_fields: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    missing_fields: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let error = self.code();
        let message = self.to_string();
        let missing_fields = match self {
            Self::Unprocessable { missing_fields, .. } => missing_fields,
            _ => Vec::new(),
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %message, "Request failed");
        }

        (
            status,
            Json(ErrorBody {
                error,
                message,
                missing_fields,
            }),
        )
            .into_response()
    }
}
