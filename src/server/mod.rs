//! WebSocket server wiring.

pub mod messages;
pub mod websocket;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::conversation::{ConversationManager, ServiceContext};

/// Shared state behind every connection.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ServiceContext>,
    pub manager: Arc<ConversationManager>,
}

impl AppState {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        let manager = Arc::new(ConversationManager::new(Arc::clone(&context)));
        Self { context, manager }
    }
}

/// Build the router: one WebSocket endpoint plus middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/client-ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
