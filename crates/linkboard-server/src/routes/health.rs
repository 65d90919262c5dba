use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::{error::AppError, state::AppState};

/// `GET /health` — liveness probe. Fails when the store is unreachable.
pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.db.ping().await.map_err(AppError::Internal)?;
    Ok(Json(json!({ "status": "ok" })))
}
