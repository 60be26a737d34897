//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use docgen_backend::llm::{CompletionBackend, CompletionRequest, LlmError};
use docgen_backend::services::call_scheduler::ModelSettings;
use docgen_backend::services::doc_generator::{DocGenConfig, InlineFile};
use docgen_backend::DocGenService;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Replays queued outcomes, then answers with a heading built from the prompt's first line
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn push(&self, outcome: Result<String, LlmError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt that reached the backend, in arrival order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt().to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.script.lock().pop_front();
        self.active.fetch_sub(1, Ordering::SeqCst);

        match scripted {
            Some(outcome) => outcome,
            None => {
                let first = request.prompt().lines().next().unwrap_or_default();
                Ok(format!("# Generated\n\n{}", first))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fast retries and a private workspace
pub fn test_config(workspace: &Path) -> DocGenConfig {
    DocGenConfig {
        llm_initial_backoff_ms: 10,
        llm_max_backoff_ms: 50,
        clone_retry_delay_ms: 10,
        workspace_dir: workspace.join("workspace"),
        ..DocGenConfig::default()
    }
}

pub fn build_service(config: DocGenConfig, backend: Arc<ScriptedBackend>) -> Arc<DocGenService> {
    Arc::new(DocGenService::new(config, backend, ModelSettings::new("test-model")))
}

pub fn inline(path: &str, content: &str) -> InlineFile {
    InlineFile {
        path: path.to_string(),
        content: content.to_string(),
        language: None,
    }
}
