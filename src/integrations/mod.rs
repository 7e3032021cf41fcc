//! 外部集成：HTTP 控制面与 Slack 事件回调（需 `server` feature 与公网 Webhook 域名）

pub mod api;
pub mod slack;

use std::sync::Arc;

use axum::Router;

use crate::ingest::Ingress;
use crate::orchestrator::ScenarioOrchestrator;

/// 路由共享状态
pub struct ServerState {
    pub orchestrator: Arc<ScenarioOrchestrator>,
    pub ingress: Ingress,
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .merge(api::routes())
        .merge(slack::routes())
        .with_state(state)
}
