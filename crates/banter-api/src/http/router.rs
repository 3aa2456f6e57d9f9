//! Axum router configuration.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/ws/chat/{conversation_id}",
            get(handlers::ws::chat_ws_handler),
        )
        .route("/health", get(handlers::health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
