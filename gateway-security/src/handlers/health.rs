use axum::{extract::State, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state
        .store
        .health_check()
        .await
        .map_err(AppError::DatabaseError)?;

    Ok(Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
    })))
}
