//! 文档生成 API 端点

use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::models::api::{
    DocumentationResponse, GenerateRequest, ProcessCodeRequest, ProcessRepositoryRequest,
};
use crate::services::doc_generator::generator::render_markdown;
use crate::services::doc_generator::ArtifactSet;
use crate::state::AppState;

/// 创建文档生成路由
pub fn docs_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/process", post(process_repository))
        .route("/api/process-code", post(process_code))
        .route("/api/generate", post(generate))
}

fn documentation_response(artifacts: ArtifactSet) -> DocumentationResponse {
    DocumentationResponse {
        success: true,
        documentation: render_markdown(&artifacts),
        artifacts,
        repo_id: None,
        branch: None,
    }
}

/// 克隆仓库并生成文档
async fn process_repository(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessRepositoryRequest>,
) -> Result<Json<DocumentationResponse>, AppError> {
    if req.repo_url.trim().is_empty() {
        return Err(AppError::BadRequest("repoUrl is required".to_string()));
    }
    info!(
        "Received repository request: url={}, branch={:?}",
        req.repo_url, req.branch
    );

    let docs = state
        .service
        .process_repository(&req.repo_url, req.branch.as_deref(), req.priority)
        .await
        .map_err(|e| state.fail(e))?;

    let mut response = documentation_response(docs.artifacts);
    response.repo_id = Some(docs.repo_id);
    response.branch = Some(docs.branch);
    Ok(Json(response))
}

/// 为单段代码生成文档
async fn process_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessCodeRequest>,
) -> Result<Json<DocumentationResponse>, AppError> {
    info!(
        "Received code request: language={:?}, chars={}",
        req.language,
        req.code.len()
    );

    let artifacts = state
        .service
        .generate_snippet(req.code, req.language, req.path)
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(documentation_response(artifacts)))
}

/// 为内联提交的文件生成文档
async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<DocumentationResponse>, AppError> {
    info!("Received generate request: files={}", req.files.len());

    let artifacts = state
        .service
        .generate(req.files, req.context.unwrap_or_default())
        .await
        .map_err(|e| state.fail(e))?;

    Ok(Json(documentation_response(artifacts)))
}
