//! REST API 请求/响应模型

use serde::{Deserialize, Serialize};

use crate::services::doc_generator::{ArtifactSet, GenerationContext, InlineFile};

/// 仓库处理请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRepositoryRequest {
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// 准入优先级，数值越大越先执行
    #[serde(default)]
    pub priority: i32,
}

/// 代码片段请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCodeRequest {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// 内联文件生成请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub files: Vec<InlineFile>,
    #[serde(default)]
    pub context: Option<GenerationContext>,
}

/// 文档生成响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentationResponse {
    pub success: bool,
    /// 合并后的 Markdown 文档
    pub documentation: String,
    pub artifacts: ArtifactSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}
