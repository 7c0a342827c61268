//! HTTP surface: admin endpoints plus provider webhooks.

pub mod handlers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::error::{Error, TransportError};
use crate::store::Database;
use crate::tracker::ConversationTracker;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub tracker: Arc<ConversationTracker>,
    /// Default approval policy; individual initiate requests may override it.
    pub auto_approve: bool,
}

/// Build the full application router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/conversations/initiate", post(handlers::initiate))
        .route(
            "/conversations/{conversation_id}/complete",
            post(handlers::complete_conversation),
        )
        .route("/messages/pending", get(handlers::pending_messages))
        .route("/messages/{message_id}/approve", post(handlers::approve_message))
        .route("/webhooks/delivery_status", post(handlers::delivery_status))
        .route("/webhooks/inbound_message", post(handlers::inbound_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) | Error::InvalidState(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            // A provider rejection carries the upstream status through,
            // matching what the admin dashboard expects to see.
            Error::Dispatch(TransportError::Rejected { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::Dispatch(_) | Error::Classification(_) | Error::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}
