//! 应用状态管理
//!
//! 定义在请求处理器之间共享的状态。

use std::sync::Arc;
use tracing::{error, warn};

use crate::error::AppError;
use crate::services::doc_generator::{DocGenError, DocGenService};

/// 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 文档生成服务
    pub service: Arc<DocGenService>,
    /// 是否在响应中返回内部错误详情
    pub expose_internal_errors: bool,
}

impl AppState {
    pub fn new(service: Arc<DocGenService>, expose_internal_errors: bool) -> Self {
        Self {
            service,
            expose_internal_errors,
        }
    }

    /// 记录完整错误，按配置决定返回给调用方的细节
    pub fn fail(&self, err: DocGenError) -> AppError {
        let app_err = AppError::from(err);
        if app_err.is_client_error() {
            warn!("Request rejected: {}", app_err);
            return app_err;
        }

        error!("Request failed: {}", app_err);
        if self.expose_internal_errors {
            app_err
        } else {
            app_err.redacted()
        }
    }
}

/// 创建可共享的应用状态
pub fn create_shared_state(service: Arc<DocGenService>, expose_internal_errors: bool) -> Arc<AppState> {
    Arc::new(AppState::new(service, expose_internal_errors))
}
