pub mod chat;
pub mod conversations;

use axum::{Router, routing::get};

use crate::state::AppState;

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", chat::routes().merge(conversations::routes()))
        .with_state(state)
}
