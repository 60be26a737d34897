//! API 格式检测和端点拼接

use serde::{Deserialize, Serialize};

/// API 格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiFormat {
    /// OpenAI Chat Completions API（及兼容服务）
    OpenAi,
    /// Anthropic Messages API
    Anthropic,
}

/// 根据模型名和服务地址检测 API 格式
///
/// 模型名包含 "claude" 或地址指向 anthropic.com 时使用 Anthropic 格式，否则使用 OpenAI 格式。
/// 通过 OpenAI 兼容网关访问 claude 模型时，地址里带 `/chat/completions` 会强制走 OpenAI 格式。
pub fn detect_api_format(model: &str, base_url: &str) -> ApiFormat {
    let url = base_url.to_lowercase();
    if url.ends_with("/chat/completions") {
        return ApiFormat::OpenAi;
    }
    if model.to_lowercase().contains("claude") || url.contains("anthropic.com") {
        ApiFormat::Anthropic
    } else {
        ApiFormat::OpenAi
    }
}

/// 去掉末尾斜杠，合并路径中的重复斜杠
pub fn fix_base_url(base_url: &str) -> String {
    let url = base_url.trim().trim_end_matches('/');

    match url.find("://") {
        Some(pos) => {
            let (scheme, rest) = url.split_at(pos + 3);
            let mut path = rest.to_string();
            while path.contains("//") {
                path = path.replace("//", "/");
            }
            format!("{}{}", scheme, path)
        }
        None => url.to_string(),
    }
}

pub fn build_openai_endpoint(base_url: &str) -> String {
    let url = fix_base_url(base_url);

    if url.ends_with("/chat/completions") {
        url
    } else if url.ends_with("/v1") {
        format!("{}/chat/completions", url)
    } else {
        format!("{}/v1/chat/completions", url)
    }
}

pub fn build_anthropic_endpoint(base_url: &str) -> String {
    let url = fix_base_url(base_url);

    if url.ends_with("/messages") {
        url
    } else if url.ends_with("/v1") {
        format!("{}/messages", url)
    } else {
        format!("{}/v1/messages", url)
    }
}

/// 部分网关会拦截非浏览器请求
pub fn get_browser_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("User-Agent", "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36"),
        ("Accept", "application/json"),
    ]
}
