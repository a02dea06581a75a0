//! # Widgets HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /widget` - List all widgets
//! - `POST /widget` - Create a widget
//! - `GET /widget/{id}` - Read one widget
//! - `PUT /widget/{id}` - Replace a widget's name and parts
//! - `DELETE /widget/{id}` - Delete a widget
//!
//! Every endpoint requires an `X-API-Key` header (see `auth`).

mod audit;
mod auth;
mod error;
mod handlers;

pub use audit::audit_rejections;
pub use auth::{API_KEY_HEADER, api_key_auth_middleware};
pub use error::{ApiError, INTERNAL_BODY, NOT_FOUND_BODY, UNAUTHORIZED_BODY};
pub use handlers::{
    DELETED_BODY, create_widget_handler, delete_widget_handler, get_widget_handler,
    list_widgets_handler, update_widget_handler,
};

use axum::{Router, middleware as axum_middleware, routing::get};
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use widgets_core::{SharedStore, WidgetStore, WidgetsError};

/// Largest accepted request body. Widget payloads are a few dozen bytes.
const MAX_BODY_BYTES: usize = 64 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the store handle.
#[derive(Clone)]
pub struct AppState {
    /// The persistence layer, shared with the backup scheduler.
    pub store: SharedStore,
}

impl AppState {
    /// Create new app state around a store.
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Run a store operation on the blocking pool.
    ///
    /// redb commits fsync, so store calls never run on a runtime worker.
    pub async fn with_store<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&dyn WidgetStore) -> Result<T, WidgetsError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::from)
    }
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. Body limit
/// 3. Rejection audit - logs responses no handler produced (413, 405, ...)
/// 4. Authentication - resolves `X-API-Key` to an `Identity`
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/widget",
            get(handlers::list_widgets_handler).post(handlers::create_widget_handler),
        )
        .route(
            "/widget/{id}",
            get(handlers::get_widget_handler)
                .put(handlers::update_widget_handler)
                .delete(handlers::delete_widget_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_auth_middleware,
        ))
        .layer(axum_middleware::from_fn(audit::audit_rejections))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the API until `shutdown` resolves and in-flight requests finish.
pub async fn run_server<F>(addr: &str, store: SharedStore, shutdown: F) -> Result<(), WidgetsError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(AppState::new(store));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WidgetsError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Widgets HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| WidgetsError::Io(format!("Server error: {}", e)))?;

    tracing::info!("Widgets HTTP server stopped accepting requests");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
