use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::AppError;
use crate::handlers::check_auth;
use crate::models::{ConversationState, TransportProfile, TurnMessage};
use crate::services::conversation::{TurnReply, TurnRequest};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TurnBody {
    pub organization_id: String,
    pub utterance: String,
    #[serde(default)]
    pub history: Option<Vec<TurnMessage>>,
    #[serde(default)]
    pub transport: Option<TransportProfile>,
}

// POST /api/sessions/:session_id/turns
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnReply>, AppError> {
    if body.organization_id.trim().is_empty() {
        return Err(AppError::BadRequest("organization_id is required".to_string()));
    }

    let reply = state
        .desk
        .handle_turn(TurnRequest {
            session_id,
            organization_id: body.organization_id,
            utterance: body.utterance,
            history: body.history,
            transport: body.transport.unwrap_or_default(),
        })
        .await?;

    Ok(Json(reply))
}

// DELETE /api/sessions/:session_id
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.desk.end_session(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("session {session_id}")))
    }
}

// GET /api/sessions/:session_id/state
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConversationState>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if !state.desk.sessions().contains(&session_id) {
        return Err(AppError::NotFound(format!("session {session_id}")));
    }
    Ok(Json(state.desk.sessions().get(&session_id).await))
}

// GET /api/functions
pub async fn list_functions(State(state): State<Arc<AppState>>) -> Json<Vec<Value>> {
    Json(state.desk.table().capability_list())
}
