//! 仓库文档生成服务 - Rust Backend
//!
//! 使用 axum 框架构建的后端服务，提供仓库、代码片段和内联文件的文档生成接口。

use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docgen_backend::config::get_config;
use docgen_backend::llm::LlmClient;
use docgen_backend::{create_api_routes, create_shared_state, spawn_cleanup_task, DocGenService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docgen_backend=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting documentation generator backend...");

    let config = get_config();
    let backend = Arc::new(
        LlmClient::new(&config.api_key, &config.base_url, config.simulate_browser)
            .context("failed to create LLM client (set DOCGEN_API_KEY or api_key in config.json)")?,
    );

    let service = Arc::new(DocGenService::new(
        config.docgen.clone(),
        backend,
        config.model_settings(),
    ));
    let cleanup = spawn_cleanup_task(Arc::clone(&service), config.docgen.cleanup_interval());

    // 创建共享状态
    let state = create_shared_state(Arc::clone(&service), config.expose_internal_errors);

    // 配置 CORS（允许所有来源）
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // 构建路由
    let app = Router::new()
        .merge(create_api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("Server listening on: {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup.abort();
    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
