//! 统一错误处理模块
//!
//! 定义应用级错误类型，并实现 axum 的 IntoResponse trait 以便自动转换为 HTTP 响应。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm::LlmError;
use crate::services::admission::QueueError;
use crate::services::call_scheduler::SchedulerError;
use crate::services::doc_generator::scanner::ScanError;
use crate::services::doc_generator::DocGenError;
use crate::services::repo_cache::CloneError;

/// 应用错误枚举
#[derive(Error, Debug)]
pub enum AppError {
    /// 请求参数错误
    #[error("请求错误: {0}")]
    BadRequest(String),

    /// 资源未找到
    #[error("未找到: {0}")]
    NotFound(String),

    /// 远程模型或 git 远端失败
    #[error("上游服务错误: {0}")]
    Upstream(String),

    /// 处理超时
    #[error("处理超时: {0}")]
    Timeout(String),

    /// 服务不可用（队列已关闭）
    #[error("服务不可用: {0}")]
    Unavailable(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 输入类错误，消息可以原样返回给调用方
    pub fn is_client_error(&self) -> bool {
        matches!(self, AppError::BadRequest(_) | AppError::NotFound(_))
    }

    /// 隐藏内部细节，只保留错误类别
    pub fn redacted(self) -> Self {
        match self {
            AppError::Upstream(_) => AppError::Upstream("upstream service failed".to_string()),
            AppError::Timeout(_) => AppError::Timeout("operation timed out".to_string()),
            AppError::Unavailable(_) => AppError::Unavailable("service unavailable".to_string()),
            AppError::Internal(_) => AppError::Internal("internal server error".to_string()),
            other => other,
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Upstream(msg)
            | AppError::Timeout(msg)
            | AppError::Unavailable(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl From<CloneError> for AppError {
    fn from(err: CloneError) -> Self {
        let msg = err.to_string();
        match err {
            CloneError::InvalidUrl(_) | CloneError::PermissionDenied(_) => AppError::BadRequest(msg),
            CloneError::RepositoryNotFound(_) | CloneError::BranchNotFound(_) => AppError::NotFound(msg),
            CloneError::Timeout(_) => AppError::Timeout(msg),
            CloneError::GitFailed(_) => AppError::Upstream(msg),
            CloneError::Io(_) => AppError::Internal(msg),
            CloneError::Queue(e) => e.into(),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Closed(_) => AppError::Unavailable(err.to_string()),
            QueueError::Aborted(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<DocGenError> for AppError {
    fn from(err: DocGenError) -> Self {
        let msg = err.to_string();
        match err {
            DocGenError::NoValidFiles | DocGenError::InvalidInput(_) => AppError::BadRequest(msg),
            DocGenError::Stage { source, .. } => match source {
                SchedulerError::Exhausted {
                    source: LlmError::Timeout(_),
                    ..
                } => AppError::Timeout(msg),
                SchedulerError::Closed => AppError::Unavailable(msg),
                _ => AppError::Upstream(msg),
            },
            DocGenError::Clone(e) => e.into(),
            DocGenError::Scan(ScanError::Timeout(_)) => AppError::Timeout(msg),
            DocGenError::Scan(_) => AppError::Internal(msg),
            DocGenError::Queue(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message()
        }));

        (self.status(), body).into_response()
    }
}

/// 便捷类型别名
pub type AppResult<T> = Result<T, AppError>;
