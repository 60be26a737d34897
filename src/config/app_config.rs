//! 应用配置管理
//!
//! 启动时从可执行文件同级的 `config.json` 加载一次，再应用环境变量覆盖，
//! 之后作为全局单例只读使用。核心服务不读取全局配置，由 `main` 显式传入。

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::services::call_scheduler::ModelSettings;
use crate::services::doc_generator::DocGenConfig;

/// 获取配置文件路径
fn get_config_path() -> PathBuf {
    // 配置文件位于可执行文件同级目录
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.json")
}

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM API 密钥
    #[serde(default)]
    pub api_key: String,

    /// LLM API 基础 URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// 模型名称
    #[serde(default = "default_model")]
    pub model: String,

    /// 温度参数 (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// 最大 token 数
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// 请求时附带浏览器请求头（部分代理服务需要）
    #[serde(default)]
    pub simulate_browser: bool,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 是否在响应中返回内部错误详情（开发模式）
    #[serde(default)]
    pub expose_internal_errors: bool,

    /// 文档生成参数
    #[serde(default)]
    pub docgen: DocGenConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_port() -> u16 {
    8765
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            simulate_browser: false,
            port: default_port(),
            expose_internal_errors: false,
            docgen: DocGenConfig::default(),
        }
    }
}

impl AppConfig {
    /// 远程调用使用的模型参数
    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.model.clone(),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }
}

/// 全局配置单例
static CONFIG: Lazy<RwLock<AppConfig>> = Lazy::new(|| {
    let mut config = load_config_from_file().unwrap_or_default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    RwLock::new(config)
});

/// 从文件加载配置
fn load_config_from_file() -> Option<AppConfig> {
    let path = get_config_path();
    if !path.exists() {
        info!("No config file at {}, using defaults", path.display());
        return None;
    }

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Invalid config file {}: {}, using defaults", path.display(), e);
            None
        }
    }
}

/// 应用环境变量覆盖
///
/// `lookup` 通常是 `std::env::var`，测试时可替换。
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = non_empty("DOCGEN_API_KEY") {
        config.api_key = key;
    }
    if let Some(url) = non_empty("DOCGEN_BASE_URL") {
        config.base_url = url;
    }
    if let Some(model) = non_empty("DOCGEN_MODEL") {
        config.model = model;
    }
    if let Some(port) = non_empty("DOCGEN_PORT") {
        match port.trim().parse() {
            Ok(port) => config.port = port,
            Err(_) => warn!("Ignoring invalid DOCGEN_PORT: {}", port),
        }
    }
}

/// 获取当前配置（克隆）
pub fn get_config() -> AppConfig {
    CONFIG.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.port, 8765);
        assert!(!config.expose_internal_errors);
        assert_eq!(config.docgen.max_concurrent_llm_calls, 4);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"model": "claude-3-5-sonnet", "docgen": {"max_files": 10}}"#).unwrap();
        assert_eq!(config.model, "claude-3-5-sonnet");
        assert_eq!(config.docgen.max_files, 10);
        assert_eq!(config.docgen.doc_batch_size, 2);
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DOCGEN_API_KEY", "sk-test"),
            ("DOCGEN_MODEL", "gpt-4o-mini"),
            ("DOCGEN_PORT", "9000"),
            ("DOCGEN_BASE_URL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.port, 9000);
        assert_eq!(config.base_url, "https://api.openai.com");
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| {
            (key == "DOCGEN_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.port, 8765);
    }

    #[test]
    fn test_model_settings() {
        let settings = AppConfig::default().model_settings();
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.max_tokens, Some(4096));
    }
}
