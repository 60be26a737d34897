//! 远程补全接口
//!
//! 调度器只依赖这个 trait，测试中可以换成脚本化的实现。

use async_trait::async_trait;

use super::types::{CompletionRequest, LlmError};

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// 发送一次请求并返回完整文本
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// 用于日志的后端名称
    fn name(&self) -> &str {
        "backend"
    }
}
