//! 远程调用调度器
//!
//! 每个 Prompt 先查 Prompt 结果缓存，未命中时在全局并发上限下调用远程模型，
//! 对可恢复错误做指数退避重试。信号量按 FIFO 顺序放行等待者。

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::{ChatMessage, CompletionBackend, CompletionRequest, LlmError};
use crate::services::doc_generator::fingerprint::prompt_hash;
use crate::services::doc_generator::types::{DocGenConfig, DocType};
use crate::utils::ttl_cache::{ExpiryPolicy, TtlCache};

/// 所有请求共用的系统提示
const SYSTEM_PROMPT: &str =
    "You are a senior software engineer who writes clear, accurate technical documentation in Markdown.";

/// 调用类别（用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    DocType(DocType),
    FileChunk { index: usize, total: usize },
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::DocType(t) => write!(f, "{}", t.as_str()),
            CallKind::FileChunk { index, total } => write!(f, "FILE_DOCS[{}/{}]", index, total),
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 单次调用的硬超时
    pub call_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// 模型参数
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &DocGenConfig, model: &ModelSettings) -> Self {
        Self {
            max_concurrent: config.max_concurrent_llm_calls.max(1),
            max_attempts: config.llm_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.llm_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.llm_max_backoff_ms),
            call_timeout: config.llm_timeout(),
            cache_ttl: config.prompt_cache_ttl(),
            cache_max_entries: config.cache_max_entries,
            model: model.model.clone(),
            temperature: model.temperature,
            max_tokens: model.max_tokens,
        }
    }

    /// 第 `attempt` 次失败后的等待时间
    ///
    /// 服务端给出 Retry-After 时优先使用，两者都不超过 `max_backoff`。
    pub fn backoff_for(&self, attempt: u32, error: &LlmError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint.min(self.max_backoff);
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// 调度器错误
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// 不可重试的错误
    #[error("远程调用被拒绝: {0}")]
    Rejected(#[source] LlmError),

    /// 重试次数耗尽
    #[error("远程调用在 {attempts} 次尝试后失败: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("调度器已关闭")]
    Closed,
}

/// 调度统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub cache_hits: u64,
    pub remote_calls: u64,
    pub retries: u64,
    pub in_flight: usize,
    pub waiting: usize,
    pub cached_prompts: usize,
}

/// 远程调用调度器
pub struct CallScheduler {
    backend: Arc<dyn CompletionBackend>,
    config: SchedulerConfig,
    cache: Mutex<TtlCache<String, String>>,
    gate: Semaphore,
    cache_hits: AtomicU64,
    remote_calls: AtomicU64,
    retries: AtomicU64,
    waiting: AtomicUsize,
}

impl CallScheduler {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: SchedulerConfig) -> Self {
        info!(
            "Call scheduler: backend={}, max_concurrent={}, max_attempts={}",
            backend.name(),
            config.max_concurrent,
            config.max_attempts
        );

        Self {
            cache: Mutex::new(TtlCache::new(
                config.cache_ttl,
                config.cache_max_entries,
                ExpiryPolicy::SinceInsert,
            )),
            gate: Semaphore::new(config.max_concurrent.max(1)),
            backend,
            config,
            cache_hits: AtomicU64::new(0),
            remote_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    fn cached(&self, key: &String) -> Option<String> {
        let hit = self.cache.lock().get(key);
        if hit.is_some() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// 执行一个 Prompt
    ///
    /// 重试在持有并发名额期间完成，调用方只会看到最终结果或终止错误。
    pub async fn execute(&self, prompt: &str, kind: CallKind) -> Result<String, SchedulerError> {
        let key = prompt_hash(prompt);

        if let Some(text) = self.cached(&key) {
            debug!("Prompt cache hit: kind={}, key={}", kind, &key[..12]);
            return Ok(text);
        }

        self.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = self.gate.acquire().await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        let _permit = permit.map_err(|_| SchedulerError::Closed)?;

        // 等待期间同样的 Prompt 可能已经完成
        if let Some(text) = self.cached(&key) {
            debug!("Prompt cache hit after wait: kind={}", kind);
            return Ok(text);
        }

        let request_id = Uuid::new_v4().to_string()[..8].to_string();
        let text = self.call_with_retry(prompt, kind, &request_id).await?;

        self.cache.lock().set(key, text.clone());
        Ok(text)
    }

    fn build_request(&self, prompt: &str) -> CompletionRequest {
        let mut request = CompletionRequest::new(
            self.config.model.clone(),
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
        );
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;
        request
    }

    async fn call_with_retry(
        &self,
        prompt: &str,
        kind: CallKind,
        request_id: &str,
    ) -> Result<String, SchedulerError> {
        let request = self.build_request(prompt);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.remote_calls.fetch_add(1, Ordering::Relaxed);
            debug!(
                "[{}] Remote call: kind={}, attempt={}/{}, prompt_len={}",
                request_id,
                kind,
                attempt,
                self.config.max_attempts,
                prompt.len()
            );

            let result = match tokio::time::timeout(
                self.config.call_timeout,
                self.backend.complete(&request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(self.config.call_timeout)),
            };

            match result {
                Ok(text) => {
                    info!(
                        "[{}] Remote call done: kind={}, attempts={}, chars={}",
                        request_id,
                        kind,
                        attempt,
                        text.len()
                    );
                    return Ok(text);
                }
                Err(e) if !e.is_retryable() => {
                    warn!("[{}] Remote call rejected: kind={}, error={}", request_id, kind, e);
                    return Err(SchedulerError::Rejected(e));
                }
                Err(e) if attempt >= self.config.max_attempts => {
                    warn!(
                        "[{}] Remote call failed after {} attempts: kind={}, error={}",
                        request_id, attempt, kind, e
                    );
                    return Err(SchedulerError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.config.backoff_for(attempt, &e);
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    if e.is_rate_limited() {
                        warn!(
                            "[{}] Rate limited (attempt {}/{}). Retrying in {:?}",
                            request_id, attempt, self.config.max_attempts, delay
                        );
                    } else {
                        warn!(
                            "[{}] Remote call failed (attempt {}/{}): {}. Retrying in {:?}",
                            request_id, attempt, self.config.max_attempts, e, delay
                        );
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight: self.config.max_concurrent.max(1) - self.gate.available_permits(),
            waiting: self.waiting.load(Ordering::Relaxed),
            cached_prompts: self.cache.lock().len(),
        }
    }

    /// 清理过期的 Prompt 缓存
    pub fn sweep_cache(&self) -> usize {
        self.cache.lock().sweep().len()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}
