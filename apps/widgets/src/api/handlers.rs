//! # API Endpoint Handlers
//!
//! One handler per method and resource. Authentication already happened in
//! the middleware; each handler receives the caller's `Identity` and emits
//! one audit event carrying the user, method, widget id and final status.

use super::{AppState, audit::audited, error::ApiError};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use widgets_core::{Identity, Validation, WidgetDraft, validate};

/// Body sent after a successful DELETE.
pub const DELETED_BODY: &str = "Widget deleted successfully";

// =============================================================================
// HELPERS
// =============================================================================

/// Ids are non-negative decimal integers; anything else names no widget.
fn parse_id(raw: &str) -> Result<u64, ApiError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::NotFound);
    }
    raw.parse().map_err(|_| ApiError::NotFound)
}

/// Run the body through the widget grammar.
fn parse_draft(body: &[u8]) -> Result<WidgetDraft, ApiError> {
    match validate(body) {
        Validation::Valid(draft) => Ok(draft),
        Validation::MalformedPayload(detail) => Err(ApiError::MalformedPayload(detail)),
        Validation::SchemaViolation(violation) => Err(ApiError::SchemaViolation(violation)),
    }
}

// =============================================================================
// ITEM HANDLERS
// =============================================================================

/// `GET /widget/{id}`
pub async fn get_widget_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(raw_id): Path<String>,
) -> Response {
    let outcome = get_widget(&state, &raw_id).await;
    audited(&identity, "get", Some(&raw_id), outcome)
}

async fn get_widget(state: &AppState, raw_id: &str) -> Result<Response, ApiError> {
    let id = parse_id(raw_id)?;
    let widget = state
        .with_store(move |store| store.get_widget(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok((StatusCode::OK, Json(widget)).into_response())
}

/// `DELETE /widget/{id}`
pub async fn delete_widget_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(raw_id): Path<String>,
) -> Response {
    let outcome = delete_widget(&state, &raw_id).await;
    audited(&identity, "delete", Some(&raw_id), outcome)
}

async fn delete_widget(state: &AppState, raw_id: &str) -> Result<Response, ApiError> {
    let id = parse_id(raw_id)?;
    let removed = state
        .with_store(move |store| store.delete_widget(id))
        .await?;
    if !removed {
        return Err(ApiError::NotFound);
    }
    Ok((StatusCode::OK, DELETED_BODY).into_response())
}

/// `PUT /widget/{id}`
///
/// The body must satisfy the same grammar as a create. `id` and
/// `created_date` never change.
pub async fn update_widget_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Response {
    let outcome = update_widget(&state, &identity, &raw_id, &body).await;
    audited(&identity, "update", Some(&raw_id), outcome)
}

async fn update_widget(
    state: &AppState,
    identity: &Identity,
    raw_id: &str,
    body: &[u8],
) -> Result<Response, ApiError> {
    let id = parse_id(raw_id)?;
    let mut widget = state
        .with_store(move |store| store.get_widget(id))
        .await?
        .ok_or(ApiError::NotFound)?;

    let draft = parse_draft(body)?;
    widget.apply_update(draft, identity.as_str(), Utc::now());

    let stored = widget.clone();
    let updated = state
        .with_store(move |store| store.update_widget(&stored))
        .await?;
    if !updated {
        // Deleted between the read and the write.
        return Err(ApiError::NotFound);
    }
    Ok((StatusCode::OK, Json(widget)).into_response())
}

// =============================================================================
// COLLECTION HANDLERS
// =============================================================================

/// `GET /widget`
pub async fn list_widgets_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Response {
    let outcome = list_widgets(&state).await;
    audited(&identity, "list", None, outcome)
}

async fn list_widgets(state: &AppState) -> Result<Response, ApiError> {
    let widgets = state.with_store(|store| store.list_widgets()).await?;
    tracing::debug!(count = widgets.len(), "Listing widgets");
    Ok((StatusCode::OK, Json(widgets)).into_response())
}

/// `POST /widget`
pub async fn create_widget_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Response {
    let outcome = create_widget(&state, &identity, &body).await;
    audited(&identity, "create", None, outcome)
}

async fn create_widget(
    state: &AppState,
    identity: &Identity,
    body: &[u8],
) -> Result<Response, ApiError> {
    let draft = parse_draft(body)?;
    let owner = identity.clone();
    let widget = state
        .with_store(move |store| store.insert_widget(draft, owner.as_str(), Utc::now()))
        .await?;
    tracing::debug!(widget_id = widget.id, "Widget created");
    Ok((StatusCode::CREATED, Json(widget)).into_response())
}

// =============================================================================
// TESTS
// =============================================================================
