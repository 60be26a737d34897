//! Anthropic Messages API 实现

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::format::{build_anthropic_endpoint, get_browser_headers};
use super::types::{parse_retry_after, CompletionRequest, LlmError};

/// Anthropic 请求载荷
#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize, Debug)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// 拼接所有 text 块
pub(crate) fn parse_anthropic_body(body: &str) -> Result<String, LlmError> {
    let response: AnthropicResponse = serde_json::from_str(body)?;
    let text: String = response
        .content
        .into_iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text)
        .collect();

    if text.trim().is_empty() {
        return Err(LlmError::MalformedResponse("no text content blocks".to_string()));
    }
    Ok(text)
}

/// 调用 Anthropic API
pub async fn complete_anthropic(
    client: &Client,
    api_key: &str,
    base_url: &str,
    request: &CompletionRequest,
    simulate_browser: bool,
) -> Result<String, LlmError> {
    let endpoint = build_anthropic_endpoint(base_url);

    // 分离系统消息
    let mut system: Option<&str> = None;
    let mut messages = Vec::new();
    for msg in &request.messages {
        if msg.role == "system" {
            system = Some(&msg.content);
        } else {
            messages.push(AnthropicMessage {
                role: &msg.role,
                content: &msg.content,
            });
        }
    }

    let payload = AnthropicRequest {
        model: &request.model,
        messages,
        system,
        max_tokens: request.max_tokens.unwrap_or(4096),
        temperature: request.temperature,
    };

    let mut builder = client
        .post(&endpoint)
        .header("Content-Type", "application/json")
        .header("x-api-key", api_key)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("anthropic-version", "2023-06-01");

    if simulate_browser {
        for (key, value) in get_browser_headers() {
            builder = builder.header(key, value);
        }
    }

    debug!("Anthropic API request: endpoint={}, model={}", endpoint, request.model);

    let response = builder.json(&payload).send().await?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let error_text = response.text().await.unwrap_or_default();
        error!(
            "Anthropic API error: status={}, body={}",
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
    parse_anthropic_body(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_blocks() {
        let body = r#"{"content":[{"type":"text","text":"Hello "},{"type":"text","text":"world"}]}"#;
        assert_eq!(parse_anthropic_body(body).unwrap(), "Hello world");
    }

    #[test]
    fn test_no_text_is_malformed() {
        let body = r#"{"content":[{"type":"tool_use","id":"x"}]}"#;
        assert!(matches!(parse_anthropic_body(body), Err(LlmError::MalformedResponse(_))));
    }
}
