//! 统一 LLM 客户端

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use super::anthropic::complete_anthropic;
use super::backend::CompletionBackend;
use super::format::{detect_api_format, ApiFormat};
use super::openai::complete_openai;
use super::types::{CompletionRequest, LlmError};

/// 统一 LLM 客户端
///
/// 支持 OpenAI 和 Anthropic API 格式，按模型名和服务地址自动选择。
/// 单次请求的超时由调度器控制，这里只设置连接超时。
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    simulate_browser: bool,
}

impl LlmClient {
    /// 创建新的 LLM 客户端
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        simulate_browser: bool,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(LlmError::ConfigError("API Key is required".to_string()));
        }

        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(LlmError::ConfigError("Base URL is required".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(LlmError::HttpError)?;

        Ok(Self {
            client,
            api_key,
            base_url,
            simulate_browser,
        })
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let api_format = detect_api_format(&request.model, &self.base_url);
        info!("LLM request: model={}, api_format={:?}", request.model, api_format);

        match api_format {
            ApiFormat::OpenAi => {
                complete_openai(
                    &self.client,
                    &self.api_key,
                    &self.base_url,
                    request,
                    self.simulate_browser,
                )
                .await
            }
            ApiFormat::Anthropic => {
                complete_anthropic(
                    &self.client,
                    &self.api_key,
                    &self.base_url,
                    request,
                    self.simulate_browser,
                )
                .await
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_config_error() {
        let result = LlmClient::new("", "https://api.openai.com", false);
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let result = LlmClient::new("sk-test", "  ", false);
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let client = LlmClient::new("sk-test", "http://127.0.0.1:9", false).unwrap();
        let request = CompletionRequest::new("gpt-4o", vec![]);
        let err = client.complete(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::HttpError(_)));
        assert!(err.is_retryable());
    }
}
