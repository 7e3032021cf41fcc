//! HTTP 控制面
//!
//! - POST /api/simulations          {email, scenario_id} 开始演练
//! - POST /api/simulations/end      {email} 结束演练
//! - GET  /api/simulations          进行中的演练
//! - GET  /api/simulations/:trainee_id
//! - GET  /api/scenarios / /api/badges  静态目录
//! - GET  /health

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::ServerState;
use crate::core::DrillError;
use crate::orchestrator::ScenarioStatus;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub email: String,
    pub scenario_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    pub email: String,
}

/// DrillError 到 HTTP 状态码的映射
pub struct ApiError(DrillError);

impl From<DrillError> for ApiError {
    fn from(e: DrillError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DrillError::DuplicateTrainee(_) | DrillError::ChannelInUse(_) => StatusCode::CONFLICT,
            DrillError::NoActiveScenario(_) | DrillError::NotFound(_) => StatusCode::NOT_FOUND,
            DrillError::ScenarioStartFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API error: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/api/simulations", post(start_simulation).get(list_simulations))
        .route("/api/simulations/end", post(end_simulation))
        .route("/api/simulations/:trainee_id", get(simulation_status))
        .route("/api/scenarios", get(list_scenarios))
        .route("/api/badges", get(list_badges))
        .route("/health", get(|| async { "OK" }))
}

async fn start_simulation(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<StartRequest>,
) -> Result<(StatusCode, Json<ScenarioStatus>), ApiError> {
    tracing::info!("Start requested: {} / {}", req.email, req.scenario_id);
    let scenario = state
        .orchestrator
        .start_scenario(req.email.trim(), req.scenario_id.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(ScenarioStatus::from(&scenario))))
}

async fn end_simulation(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<EndRequest>,
) -> Result<Json<ScenarioStatus>, ApiError> {
    let ended = state.orchestrator.end_for_email(req.email.trim()).await?;
    Ok(Json(ScenarioStatus::from(&ended)))
}

async fn list_simulations(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.list_active().await)
}

async fn simulation_status(
    State(state): State<Arc<ServerState>>,
    Path(trainee_id): Path<String>,
) -> Result<Json<ScenarioStatus>, ApiError> {
    Ok(Json(state.orchestrator.status(&trainee_id).await?))
}

async fn list_scenarios(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.catalog().await)
}

async fn list_badges(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.orchestrator.badges())
}
