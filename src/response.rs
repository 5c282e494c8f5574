//! HTTP response translation
//!
//! Successful removals become image responses; every [`BgRemovalError`]
//! becomes one JSON error body with a status picked from the error.

use crate::backends::RemovalResult;
use crate::error::BgRemovalError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Filename suggested to clients for processed images
pub const RESULT_FILENAME: &str = "background-removed.png";

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            name: None,
            cause: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Option<String>) -> Self {
        self.cause = cause;
        self
    }
}

impl From<&BgRemovalError> for ErrorResponse {
    fn from(error: &BgRemovalError) -> Self {
        let name = error.kind().to_string();
        match error {
            // Upload problems carry only the human readable reason
            BgRemovalError::Validation(message) => Self::new(message.clone()),
            BgRemovalError::Configuration(message) => {
                Self::new("Background removal is not configured")
                    .with_details(Some(message.clone()))
                    .with_name(name)
            },
            BgRemovalError::Staging { .. } => Self::new("Failed to stage uploaded image")
                .with_details(Some(error.to_string()))
                .with_name(name),
            BgRemovalError::Removal { message, cause, .. } => {
                Self::new("Failed to remove background")
                    .with_details(Some(message.clone()))
                    .with_name(name)
                    .with_cause(cause.clone())
            },
            BgRemovalError::RemoteResponse {
                message, details, ..
            } => Self::new(message.clone())
                .with_details(details.clone())
                .with_name(name),
            BgRemovalError::RemoteUnreachable(message) => {
                Self::new("Background removal service is unreachable")
                    .with_details(Some(message.clone()))
                    .with_name(name)
            },
            BgRemovalError::RemoteRequest(message) => {
                Self::new("Failed to send request to background removal service")
                    .with_details(Some(message.clone()))
                    .with_name(name)
            },
            BgRemovalError::Model(message) | BgRemovalError::Internal(message) => {
                Self::new("Internal server error")
                    .with_details(Some(message.clone()))
                    .with_name(name)
            },
        }
    }
}

impl IntoResponse for BgRemovalError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_client_error() {
            tracing::debug!(status = status.as_u16(), kind = self.kind(), error = %self, "Request rejected");
        } else {
            tracing::error!(status = status.as_u16(), kind = self.kind(), error = %self, "Request failed");
        }

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Image response for a successful removal
#[must_use]
pub fn removal_response(result: RemovalResult) -> Response {
    let content_type = HeaderValue::from_str(result.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static(crate::backends::DEFAULT_CONTENT_TYPE));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static(r#"inline; filename="background-removed.png""#),
            ),
        ],
        result.bytes,
    )
        .into_response()
}

/// Last-resort response for a panicking handler
#[must_use]
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(ToString::to_string))
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "Request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error").with_name("InternalError")),
    )
        .into_response()
}
