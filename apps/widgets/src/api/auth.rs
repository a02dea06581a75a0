//! # Authentication Middleware
//!
//! Per-user API key authentication for every route.
//!
//! ## Usage
//!
//! Send the key issued by `widgets user create <name>` in the `X-API-Key`
//! header:
//! ```text
//! X-API-Key: 0f8c2b1e-5d7a-4c39-9e61-2a4b8d0c7f13
//! ```
//!
//! On success the caller's `Identity` is inserted into the request
//! extensions for handlers to extract. On failure the request ends here
//! with 401 and no handler runs; the `auth_failure` event is its audit
//! record.

use super::{AppState, audit, error::ApiError};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use widgets_core::{AuthFailure, authenticate};

/// Header carrying the API key.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// API key authentication middleware.
pub async fn api_key_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    // A header that is not visible ASCII cannot match any issued key.
    let provided = request
        .headers()
        .get(&API_KEY_HEADER)
        .map(|v| v.to_str().map(str::to_string).unwrap_or_default());

    let outcome = state
        .with_store(move |store| Ok(authenticate(store, provided.as_deref())))
        .await?;

    match outcome {
        Ok(identity) => {
            tracing::debug!(user = %identity, "Authenticated request");
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(AuthFailure::Store(e)) => Err(ApiError::Persistence(e)),
        Err(failure) => {
            let reason = match failure {
                AuthFailure::MissingKey => "missing_api_key",
                _ => "invalid_api_key",
            };
            tracing::warn!(
                event = "auth_failure",
                reason,
                method = %request.method(),
                path = %request.uri().path(),
                status = 401,
                "Authentication failed"
            );
            Ok(audit::mark(ApiError::Unauthorized.into_response()))
        }
    }
}
