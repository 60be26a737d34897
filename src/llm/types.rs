//! LLM 类型定义

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 聊天消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 角色：system, user, assistant
    pub role: String,
    /// 消息内容
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// 单次补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// 温度参数
    pub temperature: Option<f64>,
    /// 最大 token 数
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// 最后一条用户消息
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// LLM 错误类型
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP 请求错误
    #[error("HTTP 请求失败: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API 返回错误
    #[error("API 错误 ({status}): {message}")]
    ApiError {
        status: u16,
        message: String,
        /// 服务端给出的 Retry-After
        retry_after: Option<Duration>,
    },

    /// 超时错误
    #[error("请求超时 ({0:?})")]
    Timeout(Duration),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// JSON 解析错误
    #[error("JSON 解析失败: {0}")]
    JsonError(#[from] serde_json::Error),

    /// 响应缺少预期结构
    #[error("响应格式异常: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        LlmError::ApiError {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// 模型不存在
    pub fn is_model_not_found(&self) -> bool {
        match self {
            LlmError::ApiError { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("model_not_found")
                    || lower.contains("model not found")
                    || (lower.contains("model") && lower.contains("does not exist"))
            }
            _ => false,
        }
    }

    /// 是否值得重试
    ///
    /// 认证/付费/模型不存在和其他客户端错误直接失败；
    /// 限流、5xx、网络错误、超时和格式异常可以重试。
    pub fn is_retryable(&self) -> bool {
        if self.is_model_not_found() {
            return false;
        }
        match self {
            LlmError::ApiError { status, .. } => match *status {
                401 | 402 | 403 | 404 => false,
                408 | 409 | 425 | 429 => true,
                s if s >= 500 => true,
                _ => false,
            },
            LlmError::HttpError(e) => !e.is_builder(),
            LlmError::Timeout(_) => true,
            LlmError::JsonError(_) | LlmError::MalformedResponse(_) => true,
            LlmError::ConfigError(_) => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::ApiError { status: 429, .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::ApiError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// 解析 Retry-After 头（秒数）
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_auth_and_payment_errors_are_terminal() {
        for status in [401, 402, 403, 404] {
            assert!(!LlmError::api(status, "nope").is_retryable(), "status {}", status);
        }
    }

    #[test]
    fn test_model_not_found_is_terminal() {
        let err = LlmError::api(400, r#"{"error":{"code":"model_not_found"}}"#);
        assert!(err.is_model_not_found());
        assert!(!err.is_retryable());

        let err = LlmError::api(500, "The model `gpt-x` does not exist");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(LlmError::api(429, "slow down").is_retryable());
        assert!(LlmError::api(503, "overloaded").is_retryable());
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(LlmError::MalformedResponse("no choices".into()).is_retryable());
        assert!(!LlmError::ConfigError("missing key".into()).is_retryable());
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_request_prompt_is_last_user_message() {
        let req = CompletionRequest::new(
            "gpt-4o",
            vec![ChatMessage::system("sys"), ChatMessage::user("hello")],
        );
        assert_eq!(req.prompt(), "hello");
    }
}
