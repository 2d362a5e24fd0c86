use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::handlers::check_auth;
use crate::models::TenantConfig;
use crate::state::AppState;

// GET /api/admin/organizations/:organization_id/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TenantConfig>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let config = state.desk.tenants().get(&organization_id).await;
    Ok(Json(config.as_ref().clone()))
}

// PUT /api/admin/organizations/:organization_id/config
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Path(organization_id): Path<String>,
    headers: HeaderMap,
    Json(config): Json<TenantConfig>,
) -> Result<Json<Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let stored = state
        .backend
        .save_tenant_config(&organization_id, &config)
        .map_err(|e| AppError::Internal(e.into()))?;
    if !stored {
        return Err(AppError::NotFound(format!("organization {organization_id}")));
    }

    state.desk.tenants().invalidate(&organization_id);
    tracing::info!(organization_id = %organization_id, "tenant config updated");

    Ok(Json(json!({ "ok": true })))
}
