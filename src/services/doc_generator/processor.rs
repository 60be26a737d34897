//! 文档生成服务
//!
//! 主流程：过滤文件 → 查结果缓存 → 选择文档类型 → 分批生成各类文档 →
//! 分块生成逐文件文档 → 组装产物并写入结果缓存。
//!
//! 仓库模式在此之前经过准入队列、克隆缓存和目录扫描。

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::chunker::{chunk_by_size, select_doc_types};
use super::fingerprint::{context_hash, fingerprint, fingerprint_inline, prompt_cache_key, structure_hash};
use super::generator::assemble_artifacts;
use super::prompts::{format_doc_type_prompt, format_file_docs_prompt};
use super::scanner::{scan_in_worker, FileFilter, ScanError, ScanRequest};
use super::types::{
    detect_language, ArtifactSet, DocGenConfig, DocTask, DocType, FileRecord, GenerationContext,
    InlineFile,
};
use crate::llm::CompletionBackend;
use crate::services::admission::{AdmissionQueue, QueueError, QueueStats};
use crate::services::call_scheduler::{
    CallKind, CallScheduler, ModelSettings, SchedulerConfig, SchedulerError, SchedulerStats,
};
use crate::services::repo_cache::{CloneError, CloneSettings, RepoCache, RepoCacheStats};
use crate::utils::ttl_cache::{ExpiryPolicy, TtlCache};

/// 文档生成错误
#[derive(Debug, thiserror::Error)]
pub enum DocGenError {
    #[error("没有可用于生成文档的文件")]
    NoValidFiles,

    #[error("无效输入: {0}")]
    InvalidInput(String),

    /// 某一次远程调用失败，整次生成随之失败
    #[error("{stage} 生成失败 (fingerprint={fingerprint}): {source}")]
    Stage {
        stage: CallKind,
        fingerprint: String,
        #[source]
        source: SchedulerError,
    },

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// 仓库处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDocs {
    pub repo_id: String,
    pub branch: String,
    pub artifacts: ArtifactSet,
}

/// 一次缓存清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub repos: usize,
    pub results: usize,
    pub prompts: usize,
    pub completions: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.repos + self.results + self.prompts + self.completions
    }
}

/// 服务状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub clone_queue: QueueStats,
    pub repo_queue: QueueStats,
    pub scheduler: SchedulerStats,
    pub repo_cache: RepoCacheStats,
    pub cached_results: usize,
    pub cached_prompt_texts: usize,
}

/// 从仓库地址推导 `owner_repo` 形式的标识
pub fn repo_id_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let segments: Vec<&str> = trimmed
        .split(|c: char| c == '/' || c == ':')
        .filter(|s| !s.is_empty())
        .collect();
    let tail = if segments.len() >= 2 {
        &segments[segments.len() - 2..]
    } else {
        &segments[..]
    };

    tail.join("_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 文档生成服务
pub struct DocGenService {
    config: DocGenConfig,
    filter: FileFilter,
    scheduler: Arc<CallScheduler>,
    repo_queue: Arc<AdmissionQueue>,
    repo_cache: RepoCache,
    /// 指纹 → 完整产物集合
    results: Mutex<TtlCache<String, ArtifactSet>>,
    /// (文档类型, 结构哈希, 上下文哈希) → Prompt 文本
    prompts: Mutex<TtlCache<String, String>>,
}

impl DocGenService {
    /// 创建服务（需在 Tokio 运行时内调用）
    pub fn new(config: DocGenConfig, backend: Arc<dyn CompletionBackend>, model: ModelSettings) -> Self {
        let scheduler = Arc::new(CallScheduler::new(
            backend,
            SchedulerConfig::from_config(&config, &model),
        ));
        let clone_queue = Arc::new(AdmissionQueue::new("clone", config.max_concurrent_clones));
        let repo_queue = Arc::new(AdmissionQueue::new("repository", config.max_concurrent_repo_jobs));
        let repo_cache = RepoCache::new(CloneSettings::from_config(&config), clone_queue);

        info!(
            "DocGen service ready: model={}, clones={}, repo_jobs={}, llm_calls={}",
            model.model,
            config.max_concurrent_clones,
            config.max_concurrent_repo_jobs,
            config.max_concurrent_llm_calls
        );

        Self {
            filter: FileFilter::from_config(&config),
            results: Mutex::new(TtlCache::new(
                config.result_cache_ttl(),
                config.cache_max_entries,
                ExpiryPolicy::SinceInsert,
            )),
            prompts: Mutex::new(TtlCache::new(
                config.prompt_cache_ttl(),
                config.cache_max_entries,
                ExpiryPolicy::SinceInsert,
            )),
            scheduler,
            repo_queue,
            repo_cache,
            config,
        }
    }

    pub fn config(&self) -> &DocGenConfig {
        &self.config
    }

    /// 为内联提交的文件生成文档
    pub async fn generate(
        &self,
        files: Vec<InlineFile>,
        context: GenerationContext,
    ) -> Result<ArtifactSet, DocGenError> {
        let fp = fingerprint_inline(&files, &context);
        if let Some(hit) = self.cached_result(&fp) {
            return Ok(hit);
        }

        let records: Vec<FileRecord> = files
            .iter()
            .filter_map(|f| self.filter.accept_inline(f))
            .collect();
        self.generate_from_records(records, context, fp).await
    }

    /// 为单段代码生成文档
    pub async fn generate_snippet(
        &self,
        code: String,
        language: Option<String>,
        path: Option<String>,
    ) -> Result<ArtifactSet, DocGenError> {
        if code.trim().is_empty() {
            return Err(DocGenError::InvalidInput("code must not be empty".to_string()));
        }

        let language = language
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .or_else(|| {
                path.as_deref()
                    .map(detect_language)
                    .filter(|l| *l != "text")
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "text".to_string());
        let path = path
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| format!("snippet.{}", language));

        let mut context = GenerationContext::new();
        context.insert("language".to_string(), json!(language));
        context.insert("mode".to_string(), json!("snippet"));

        let file = InlineFile {
            path,
            content: code,
            language: Some(language),
        };
        self.generate(vec![file], context).await
    }

    /// 克隆并扫描远程仓库后生成文档
    ///
    /// 整个处理过程在仓库准入队列中执行，优先级高者先开始。
    pub async fn process_repository(
        self: &Arc<Self>,
        url: &str,
        branch: Option<&str>,
        priority: i32,
    ) -> Result<RepositoryDocs, DocGenError> {
        let service = Arc::clone(self);
        let url = url.trim().to_string();
        let branch = branch.map(str::to_string);

        self.repo_queue
            .submit(
                async move { service.run_repository_job(url, branch, priority).await },
                priority,
            )
            .await?
    }

    async fn run_repository_job(
        &self,
        url: String,
        branch: Option<String>,
        priority: i32,
    ) -> Result<RepositoryDocs, DocGenError> {
        let checkout = self.repo_cache.acquire(&url, branch.as_deref(), priority).await?;
        let repo_id = repo_id_from_url(&checkout.url);
        info!(
            "Processing repository: id={}, branch={}, path={}",
            repo_id,
            checkout.branch,
            checkout.local_path.display()
        );

        let request = ScanRequest::from_config(&checkout.local_path, &self.config);
        let records = scan_in_worker(request, self.config.scan_timeout()).await?;

        let mut context = GenerationContext::new();
        context.insert("projectName".to_string(), json!(repo_id));
        context.insert("repoUrl".to_string(), json!(checkout.url));
        context.insert("branch".to_string(), json!(checkout.branch));

        let fp = fingerprint(&records, &context);
        let artifacts = match self.cached_result(&fp) {
            Some(hit) => hit,
            None => self.generate_from_records(records, context, fp).await?,
        };

        Ok(RepositoryDocs {
            repo_id,
            branch: checkout.branch,
            artifacts,
        })
    }

    fn cached_result(&self, fp: &String) -> Option<ArtifactSet> {
        let hit = self.results.lock().get(fp);
        if hit.is_some() {
            debug!("Result cache hit: fingerprint={}", &fp[..12]);
        }
        hit
    }

    async fn generate_from_records(
        &self,
        records: Vec<FileRecord>,
        context: GenerationContext,
        fp: String,
    ) -> Result<ArtifactSet, DocGenError> {
        let files = self.prepare_files(records);
        if files.is_empty() {
            return Err(DocGenError::NoValidFiles);
        }

        let doc_types = select_doc_types(&files, &self.config);
        info!(
            "Generating docs: fingerprint={}, files={}, doc_types={:?}",
            &fp[..12],
            files.len(),
            doc_types.iter().map(|t| t.as_str()).collect::<Vec<_>>()
        );

        let tasks = self.build_doc_tasks(&doc_types, &files, &context);
        let jobs: Vec<(CallKind, String)> = tasks
            .into_iter()
            .map(|task| (CallKind::DocType(task.doc_type), task.prompt))
            .collect();
        let doc_outputs: Vec<(DocType, String)> = doc_types
            .iter()
            .copied()
            .zip(self.run_batches(&fp, jobs).await?)
            .collect();

        let chunks = chunk_by_size(&files, self.config.chunk_size_budget);
        let total = chunks.len();
        let chunk_jobs: Vec<(CallKind, String)> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                (
                    CallKind::FileChunk { index: i + 1, total },
                    format_file_docs_prompt(chunk, i + 1, total, &context, self.config.max_chars_per_file),
                )
            })
            .collect();
        let file_doc_parts = self.run_batches(&fp, chunk_jobs).await?;

        let artifacts = assemble_artifacts(doc_outputs, &file_doc_parts);
        info!(
            "Docs generated: fingerprint={}, artifacts={}",
            &fp[..12],
            artifacts.len()
        );

        self.results.lock().set(fp, artifacts.clone());
        Ok(artifacts)
    }

    /// 去重并限制文件数量（保留先出现者）
    fn prepare_files(&self, records: Vec<FileRecord>) -> Vec<FileRecord> {
        let mut seen = HashSet::new();
        let mut files: Vec<FileRecord> = records
            .into_iter()
            .filter(|f| seen.insert(f.path.clone()))
            .collect();

        if files.len() > self.config.max_files {
            warn!(
                "Too many files ({}), keeping the first {}",
                files.len(),
                self.config.max_files
            );
            files.truncate(self.config.max_files);
        }
        files
    }

    fn build_doc_tasks(
        &self,
        doc_types: &[DocType],
        files: &[FileRecord],
        context: &GenerationContext,
    ) -> Vec<DocTask> {
        let structure = structure_hash(files);
        let ctx_hash = context_hash(context);

        doc_types
            .iter()
            .map(|&doc_type| {
                let key = prompt_cache_key(doc_type, &structure, &ctx_hash);
                let cached = self.prompts.lock().get(&key);
                let prompt = match cached {
                    Some(prompt) => prompt,
                    None => {
                        let prompt = format_doc_type_prompt(
                            doc_type,
                            files,
                            context,
                            self.config.max_chars_per_file,
                            self.config.chunk_size_budget,
                        );
                        self.prompts.lock().set(key, prompt.clone());
                        prompt
                    }
                };
                DocTask { doc_type, prompt }
            })
            .collect()
    }

    /// 按批次并发执行，批内全部完成后才开始下一批；任一失败即整体失败
    async fn run_batches(
        &self,
        fp: &str,
        jobs: Vec<(CallKind, String)>,
    ) -> Result<Vec<String>, DocGenError> {
        let batch_size = self.config.doc_batch_size.max(1);
        let mut outputs = Vec::with_capacity(jobs.len());

        for batch in jobs.chunks(batch_size) {
            let results = join_all(
                batch
                    .iter()
                    .map(|(kind, prompt)| self.scheduler.execute(prompt, *kind)),
            )
            .await;

            for ((kind, _), result) in batch.iter().zip(results) {
                let text = result.map_err(|source| DocGenError::Stage {
                    stage: *kind,
                    fingerprint: fp.to_string(),
                    source,
                })?;
                outputs.push(text);
            }
        }

        Ok(outputs)
    }

    /// 清理所有缓存中的过期条目
    pub fn sweep_caches(&self) -> SweepReport {
        SweepReport {
            repos: self.repo_cache.sweep_expired(),
            results: self.results.lock().sweep().len(),
            prompts: self.prompts.lock().sweep().len(),
            completions: self.scheduler.sweep_cache(),
        }
    }

    /// 关闭前删除所有克隆目录
    pub async fn shutdown(&self) -> usize {
        let removed = self.repo_cache.cleanup_all().await;
        info!("DocGen service shut down, removed {} checkouts", removed);
        removed
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            clone_queue: self.repo_cache.queue().stats(),
            repo_queue: self.repo_queue.stats(),
            scheduler: self.scheduler.stats(),
            repo_cache: self.repo_cache.stats(),
            cached_results: self.results.lock().len(),
            cached_prompt_texts: self.prompts.lock().len(),
        }
    }
}
