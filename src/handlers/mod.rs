pub mod admin;
pub mod events;
pub mod health;
pub mod sessions;
pub mod webhook;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::errors::AppError;
use crate::state::AppState;

pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/functions", get(sessions::list_functions))
        .route("/api/sessions/:session_id/turns", post(sessions::post_turn))
        .route("/api/sessions/:session_id", delete(sessions::end_session))
        .route("/api/sessions/:session_id/state", get(sessions::get_state))
        .route(
            "/api/admin/organizations/:organization_id/config",
            put(admin::put_config).get(admin::get_config),
        )
        .route("/api/events", get(events::events_stream))
        .route("/webhook/sms/:organization_id", post(webhook::sms_webhook))
        .with_state(state)
}
