use axum::extract::State;
use serde::Serialize;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub database: &'static str,
}

/// GET /health - store connectivity
pub async fn health(State(state): State<AppState>) -> ApiResult<HealthStatus> {
    state.executor.ping().await?;
    Ok(ApiResponse::success(HealthStatus {
        status: "ok",
        timestamp: chrono::Utc::now(),
        database: "ok",
    }))
}
