//! LLM 模块
//!
//! 提供统一的 LLM 客户端，支持 OpenAI 和 Anthropic API 格式。

mod anthropic;
mod backend;
mod client;
mod format;
mod openai;
mod types;

pub use backend::CompletionBackend;
pub use client::LlmClient;
pub use format::{build_anthropic_endpoint, build_openai_endpoint, detect_api_format, ApiFormat};
pub use types::*;
