//! 健康检查与运行状态端点

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::services::doc_generator::ServiceStats;
use crate::state::AppState;
use std::sync::Arc;

/// 健康检查处理器
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok"
    }))
}

/// 队列、调度器和缓存状态
async fn status(State(state): State<Arc<AppState>>) -> Json<ServiceStats> {
    Json(state.service.stats())
}

/// 创建健康检查路由
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(status))
}
