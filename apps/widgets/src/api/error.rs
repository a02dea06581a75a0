//! # API Errors
//!
//! Every way a request can fail, and the status and body each one gets.
//! Bodies are short plain text; storage details stay in the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use widgets_core::{SchemaViolation, WidgetsError, validation::MALFORMED_REASON};

/// Body sent with every 401.
pub const UNAUTHORIZED_BODY: &str = "Invalid API key";

/// Body sent with every 404.
pub const NOT_FOUND_BODY: &str = "Widget not found";

/// Body sent with every 500.
pub const INTERNAL_BODY: &str = "Internal server error";

/// A failed request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unknown `X-API-Key`.
    #[error("unauthorized")]
    Unauthorized,

    /// No widget has the requested id.
    #[error("widget not found")]
    NotFound,

    /// The body is not JSON. Carries the parser message for the log.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The body is JSON but breaks the widget grammar.
    #[error("schema violation: {0}")]
    SchemaViolation(SchemaViolation),

    /// The store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] WidgetsError),

    /// A blocking store task did not complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::SchemaViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Unauthorized => UNAUTHORIZED_BODY,
            Self::NotFound => NOT_FOUND_BODY,
            Self::MalformedPayload(_) => MALFORMED_REASON,
            Self::SchemaViolation(violation) => violation.reason(),
            Self::Persistence(e) => {
                tracing::error!(event = "persistence_failure", error = %e, "Store operation failed");
                INTERNAL_BODY
            }
            Self::Internal(e) => {
                tracing::error!(event = "internal_failure", error = %e, "Request task failed");
                INTERNAL_BODY
            }
        };
        (self.status(), body).into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::MalformedPayload("eof".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::SchemaViolation(SchemaViolation::Parts).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Persistence(WidgetsError::Storage("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn persistence_details_not_exposed() {
        let response =
            ApiError::Persistence(WidgetsError::Storage("/secret/path".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
