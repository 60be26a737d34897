//! OpenAI Chat Completions API 实现

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::format::{build_openai_endpoint, get_browser_headers};
use super::types::{parse_retry_after, ChatMessage, CompletionRequest, LlmError};

/// OpenAI 请求载荷
#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAiChoice {
    message: Option<OpenAiMessage>,
}

#[derive(Deserialize, Debug)]
struct OpenAiMessage {
    content: Option<String>,
}

/// 从响应体提取文本
pub(crate) fn parse_openai_body(body: &str) -> Result<String, LlmError> {
    let response: OpenAiResponse = serde_json::from_str(body)?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| LlmError::MalformedResponse("missing choices[0].message.content".to_string()))?;

    if content.trim().is_empty() {
        return Err(LlmError::MalformedResponse("empty completion".to_string()));
    }
    Ok(content)
}

/// 调用 OpenAI API
pub async fn complete_openai(
    client: &Client,
    api_key: &str,
    base_url: &str,
    request: &CompletionRequest,
    simulate_browser: bool,
) -> Result<String, LlmError> {
    let endpoint = build_openai_endpoint(base_url);

    let payload = OpenAiRequest {
        model: &request.model,
        messages: &request.messages,
        stream: false,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };

    let mut builder = client
        .post(&endpoint)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json");

    // 添加浏览器模拟头
    if simulate_browser {
        for (key, value) in get_browser_headers() {
            builder = builder.header(key, value);
        }
    }

    debug!("OpenAI API request: endpoint={}, model={}", endpoint, request.model);

    let response = builder.json(&payload).send().await?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let error_text = response.text().await.unwrap_or_default();
        error!(
            "OpenAI API error: status={}, body={}",
            status.as_u16(),
            error_text.chars().take(500).collect::<String>()
        );
        return Err(LlmError::ApiError {
            status: status.as_u16(),
            message: error_text,
            retry_after,
        });
    }

    let body = response.text().await?;
    parse_openai_body(&body)
}
