//! # Request Audit
//!
//! Every request leaves exactly one audit event.
//!
//! Handlers and the auth middleware write their own, richer events and tag
//! the response with [`Audited`]. Anything that reaches the client without
//! the tag was turned away by axum before a handler ran: a 413 from the body
//! limit, a 405 from the method router, a 404 for an unknown path. The
//! outer [`audit_rejections`] layer records those.

use super::error::ApiError;
use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use widgets_core::Identity;

/// Response extension: an audit event for this request was already written.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Audited;

/// Tag a response as already audited.
pub(crate) fn mark(mut response: Response) -> Response {
    response.extensions_mut().insert(Audited);
    response
}

/// Turn a handler outcome into a response and write the audit event for it.
pub(crate) fn audited(
    identity: &Identity,
    operation: &'static str,
    widget_id: Option<&str>,
    outcome: Result<Response, ApiError>,
) -> Response {
    let (response, reason) = match outcome {
        Ok(response) => (response, None),
        Err(e) => {
            let reason = e.to_string();
            (e.into_response(), Some(reason))
        }
    };
    let status = response.status().as_u16();
    let widget_id = widget_id.unwrap_or("-");

    if let Some(reason) = reason {
        tracing::warn!(
            event = "request_failed",
            user = %identity,
            operation,
            widget_id,
            status,
            reason = %reason,
            "Widget request failed"
        );
    } else {
        tracing::info!(
            event = "request_completed",
            user = %identity,
            operation,
            widget_id,
            status,
            "Widget request completed"
        );
    }
    mark(response)
}

/// Outer middleware logging responses that no handler accounted for.
pub async fn audit_rejections(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    if response.extensions().get::<Audited>().is_none() {
        tracing::warn!(
            event = "request_rejected",
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            "Request rejected before reaching a handler"
        );
    }
    response
}
