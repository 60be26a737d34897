//! 文档生成器模块
//!
//! 基于 LLM 为源码生成 Markdown 文档。
//!
//! # 流程
//!
//! - 过滤输入文件（忽略目录、二进制文件、超大文件）
//! - 按文件集合指纹查结果缓存
//! - 按项目特征选择文档类型，分批调用远程模型
//! - 按大小预算分块生成逐文件文档
//! - 组装以文件名为键的产物集合
//!
//! # 使用示例
//!
//! ```ignore
//! use std::sync::Arc;
//! use docgen_backend::llm::LlmClient;
//! use docgen_backend::services::call_scheduler::ModelSettings;
//! use docgen_backend::services::doc_generator::{DocGenConfig, DocGenService};
//!
//! let backend = Arc::new(LlmClient::new("api_key", "https://api.openai.com/v1", false)?);
//! let service = DocGenService::new(DocGenConfig::default(), backend, ModelSettings::new("gpt-4o"));
//!
//! let artifacts = service.generate(files, Default::default()).await?;
//! ```

pub mod chunker;
pub mod fingerprint;
pub mod generator;
mod processor;
pub mod prompts;
pub mod scanner;
pub mod types;

pub use processor::{
    repo_id_from_url, DocGenError, DocGenService, RepositoryDocs, ServiceStats, SweepReport,
};
pub use types::{Artifact, ArtifactSet, DocGenConfig, DocType, GenerationContext, InlineFile};
