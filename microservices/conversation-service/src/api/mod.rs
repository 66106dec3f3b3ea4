//! API module - REST and WebSocket

pub mod error;
pub mod rest;
pub mod websocket;

pub use error::ApiError;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::handlers::CommandDispatcher;
use crate::infrastructure::IdentityVerifier;
use crate::metrics::ServiceMetrics;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<CommandDispatcher>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub metrics: Arc<ServiceMetrics>,
    pub started_at: Instant,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::ready_check))
        .route("/metrics", get(rest::metrics))

        // Conversation endpoints
        .route("/im/v1/conversations", post(rest::create_group).get(rest::list_conversations))
        .route("/im/v1/conversations/direct", post(rest::open_direct))
        .route("/im/v1/conversations/{id}", get(rest::get_conversation).patch(rest::update_info))
        .route("/im/v1/conversations/{id}/settings", patch(rest::update_settings))
        .route("/im/v1/conversations/{id}/stats", get(rest::conversation_stats))
        .route("/im/v1/conversations/{id}/deactivate", post(rest::deactivate))
        .route("/im/v1/conversations/{id}/encryption-key", put(rest::set_encryption_key))

        // Membership endpoints
        .route("/im/v1/conversations/{id}/participants", post(rest::add_participants))
        .route("/im/v1/conversations/{id}/participants/{user_id}", delete(rest::remove_participant))
        .route("/im/v1/conversations/{id}/participants/{user_id}/role", put(rest::change_role))
        .route("/im/v1/conversations/{id}/participants/{user_id}/mute", put(rest::set_muted))
        .route("/im/v1/conversations/{id}/join", post(rest::join))
        .route("/im/v1/conversations/{id}/leave", post(rest::leave))
        .route("/im/v1/conversations/{id}/archive", put(rest::set_archived))
        .route("/im/v1/conversations/{id}/preferences", patch(rest::update_preferences))

        // Message endpoints
        .route("/im/v1/conversations/{id}/messages", post(rest::send_message).get(rest::list_messages))
        .route("/im/v1/conversations/{id}/pins", post(rest::pin_message))
        .route("/im/v1/conversations/{id}/pins/{message_id}", delete(rest::unpin_message))
        .route("/im/v1/users/{user_id}/messages", post(rest::send_direct))
        .route("/im/v1/messages/{id}", put(rest::edit_message).delete(rest::delete_message))
        .route("/im/v1/messages/{id}/reactions", post(rest::react_to_message))
        .route("/im/v1/messages/{id}/delivered", post(rest::record_delivery))
        .route("/im/v1/messages/{id}/forward", post(rest::forward_message))

        // Read state and typing
        .route("/im/v1/conversations/{id}/read", post(rest::mark_read))
        .route("/im/v1/conversations/{id}/unread", get(rest::unread_count))
        .route("/im/v1/unread", get(rest::total_unread))
        .route("/im/v1/conversations/{id}/typing", post(rest::set_typing).get(rest::active_typers))

        // WebSocket
        .route("/im/v1/ws", get(websocket::ws_handler))
        .with_state(state)
}
