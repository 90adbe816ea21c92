use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::error::AppError;
use crate::state::AppState;
use crate::types::ConversationResponse;

pub fn routes() -> Router<AppState> {
    Router::new().route("/conversations/{id}", get(get_conversation))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, AppError> {
    if !state.conversations.contains(&id).await {
        return Err(AppError::NotFound(format!("Conversation '{id}' not found")));
    }
    let turns = state.conversations.history(&id).await;
    Ok(Json(ConversationResponse {
        conversation_id: id,
        turns,
    }))
}
