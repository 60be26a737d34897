//! 文档生成器类型定义
//!
//! 定义文件记录、文档类型、产物以及生成配置

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// 扫描得到的文本文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 相对仓库根目录的路径（统一为 `/` 分隔）
    pub path: String,
    /// UTF-8 文本内容
    pub content: String,
    /// 字节数
    pub size: u64,
    /// 调用方声明的语言，缺省时按扩展名推断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: normalize_path(&path.into()),
            size: content.len() as u64,
            content,
            language: None,
        }
    }

    /// 附加声明的语言（空白值视为未声明）
    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty());
        self
    }

    /// 代码块使用的语言标记
    pub fn language(&self) -> &str {
        match self.language.as_deref() {
            Some(language) => language,
            None => detect_language(&self.path),
        }
    }

    /// 文件扩展名（小写，不含点）
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

/// 调用方直接提交的文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineFile {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// 生成上下文：任意 JSON 键值，按键有序
pub type GenerationContext = BTreeMap<String, serde_json::Value>;

/// 文档类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    Overview,
    ApiReference,
    SetupGuide,
    DeveloperGuide,
    Architecture,
    FileDocs,
}

impl DocType {
    /// 规范顺序
    pub const ALL: [DocType; 6] = [
        DocType::Overview,
        DocType::ApiReference,
        DocType::SetupGuide,
        DocType::DeveloperGuide,
        DocType::Architecture,
        DocType::FileDocs,
    ];

    /// 产物文件名
    pub fn filename(&self) -> &'static str {
        match self {
            DocType::Overview => "README.md",
            DocType::ApiReference => "API_REFERENCE.md",
            DocType::SetupGuide => "SETUP_GUIDE.md",
            DocType::DeveloperGuide => "DEVELOPER_GUIDE.md",
            DocType::Architecture => "ARCHITECTURE.md",
            DocType::FileDocs => "FILE_DOCUMENTATION.md",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DocType::Overview => "Project Overview",
            DocType::ApiReference => "API Reference",
            DocType::SetupGuide => "Setup Guide",
            DocType::DeveloperGuide => "Developer Guide",
            DocType::Architecture => "Architecture",
            DocType::FileDocs => "File Documentation",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Overview => "OVERVIEW",
            DocType::ApiReference => "API_REFERENCE",
            DocType::SetupGuide => "SETUP_GUIDE",
            DocType::DeveloperGuide => "DEVELOPER_GUIDE",
            DocType::Architecture => "ARCHITECTURE",
            DocType::FileDocs => "FILE_DOCS",
        }
    }
}

/// 一次生成请求中的单个 Prompt
#[derive(Debug, Clone)]
pub struct DocTask {
    pub doc_type: DocType,
    pub prompt: String,
}

/// 按大小分组后的文件批次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub files: Vec<FileRecord>,
}

impl Chunk {
    /// 批次内容总长度
    pub fn content_len(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// 产物元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    /// 生成时间（RFC 3339）
    pub generated: String,
    /// 固定为 "documentation"
    #[serde(rename = "type")]
    pub kind: String,
    /// 固定为 "markdown"
    pub format: String,
    /// 对应的文档类型
    pub doc_type: DocType,
}

/// 单个生成产物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub content: String,
    pub metadata: ArtifactMetadata,
}

/// 产物集合：文件名 -> 产物
pub type ArtifactSet = BTreeMap<String, Artifact>;

/// 文档生成配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocGenConfig {
    /// 同时进行的克隆数量
    #[serde(default = "default_max_concurrent_clones")]
    pub max_concurrent_clones: usize,

    /// 同时处理的整仓任务数量
    #[serde(default = "default_max_concurrent_repo_jobs")]
    pub max_concurrent_repo_jobs: usize,

    /// 同时在途的远程调用数量
    #[serde(default = "default_max_concurrent_llm_calls")]
    pub max_concurrent_llm_calls: usize,

    /// 单文件大小上限（字节，默认1MB）
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// 单次处理的文件数量上限
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// 单个批次的字符预算
    #[serde(default = "default_chunk_size_budget")]
    pub chunk_size_budget: usize,

    /// 构建 Prompt 时每个文件的最大字符数
    #[serde(default = "default_max_chars_per_file")]
    pub max_chars_per_file: usize,

    /// 每批并发提交的 Prompt 数量
    #[serde(default = "default_doc_batch_size")]
    pub doc_batch_size: usize,

    #[serde(default = "default_result_cache_ttl_secs")]
    pub result_cache_ttl_secs: u64,

    #[serde(default = "default_prompt_cache_ttl_secs")]
    pub prompt_cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,

    /// 克隆缓存按最后访问时间计算的 TTL
    #[serde(default = "default_repo_cache_ttl_secs")]
    pub repo_cache_ttl_secs: u64,

    /// 后台清理间隔
    #[serde(default = "default_repo_cleanup_interval_secs")]
    pub repo_cleanup_interval_secs: u64,

    /// 克隆最大尝试次数
    #[serde(default = "default_clone_attempts")]
    pub clone_attempts: u32,

    #[serde(default = "default_clone_retry_delay_ms")]
    pub clone_retry_delay_ms: u64,

    /// 远程调用最大尝试次数
    #[serde(default = "default_llm_max_attempts")]
    pub llm_max_attempts: u32,

    #[serde(default = "default_llm_initial_backoff_ms")]
    pub llm_initial_backoff_ms: u64,

    #[serde(default = "default_llm_max_backoff_ms")]
    pub llm_max_backoff_ms: u64,

    /// 扫描时每批处理的文件数
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// 文件数超过该值时生成开发者指南
    #[serde(default = "default_developer_guide_threshold")]
    pub developer_guide_threshold: usize,

    /// 文件数超过该值时生成架构文档
    #[serde(default = "default_architecture_threshold")]
    pub architecture_threshold: usize,

    /// 忽略的目录（支持 glob）
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// 二进制扩展名黑名单
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,

    /// 克隆工作目录
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
}

fn default_max_concurrent_clones() -> usize {
    2
}

fn default_max_concurrent_repo_jobs() -> usize {
    2
}

fn default_max_concurrent_llm_calls() -> usize {
    4
}

fn default_max_file_size() -> u64 {
    1024 * 1024 // 1MB
}

fn default_max_files() -> usize {
    500
}

fn default_chunk_size_budget() -> usize {
    50_000
}

fn default_max_chars_per_file() -> usize {
    8_000
}

fn default_doc_batch_size() -> usize {
    2
}

fn default_result_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_prompt_cache_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_clone_timeout_secs() -> u64 {
    120
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_scan_timeout_secs() -> u64 {
    60
}

fn default_repo_cache_ttl_secs() -> u64 {
    60 * 60
}

fn default_repo_cleanup_interval_secs() -> u64 {
    5 * 60
}

fn default_clone_attempts() -> u32 {
    3
}

fn default_clone_retry_delay_ms() -> u64 {
    2000
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_llm_initial_backoff_ms() -> u64 {
    1000
}

fn default_llm_max_backoff_ms() -> u64 {
    30_000
}

fn default_scan_batch_size() -> usize {
    256
}

fn default_developer_guide_threshold() -> usize {
    10
}

fn default_architecture_threshold() -> usize {
    30
}

fn default_ignored_dirs() -> Vec<String> {
    [
        ".git",
        ".svn",
        ".hg",
        "node_modules",
        "bower_components",
        "vendor",
        "__pycache__",
        ".venv",
        "venv",
        "target",
        "dist",
        "build",
        "out",
        "coverage",
        ".next",
        ".nuxt",
        ".cache",
        ".idea",
        ".vscode",
        "*.egg-info",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_binary_extensions() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", "pdf", "doc", "docx",
        "xls", "xlsx", "ppt", "pptx", "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar",
        "war", "class", "exe", "dll", "so", "dylib", "a", "o", "obj", "lib", "bin", "dat", "db",
        "sqlite", "pyc", "pyo", "wasm", "mp3", "mp4", "avi", "mov", "mkv", "wav", "flac", "ogg",
        "ttf", "otf", "woff", "woff2", "eot",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_workspace_dir() -> PathBuf {
    std::env::temp_dir().join("docgen-repos")
}

impl Default for DocGenConfig {
    fn default() -> Self {
        Self {
            max_concurrent_clones: default_max_concurrent_clones(),
            max_concurrent_repo_jobs: default_max_concurrent_repo_jobs(),
            max_concurrent_llm_calls: default_max_concurrent_llm_calls(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            chunk_size_budget: default_chunk_size_budget(),
            max_chars_per_file: default_max_chars_per_file(),
            doc_batch_size: default_doc_batch_size(),
            result_cache_ttl_secs: default_result_cache_ttl_secs(),
            prompt_cache_ttl_secs: default_prompt_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            clone_timeout_secs: default_clone_timeout_secs(),
            llm_timeout_secs: default_llm_timeout_secs(),
            scan_timeout_secs: default_scan_timeout_secs(),
            repo_cache_ttl_secs: default_repo_cache_ttl_secs(),
            repo_cleanup_interval_secs: default_repo_cleanup_interval_secs(),
            clone_attempts: default_clone_attempts(),
            clone_retry_delay_ms: default_clone_retry_delay_ms(),
            llm_max_attempts: default_llm_max_attempts(),
            llm_initial_backoff_ms: default_llm_initial_backoff_ms(),
            llm_max_backoff_ms: default_llm_max_backoff_ms(),
            scan_batch_size: default_scan_batch_size(),
            developer_guide_threshold: default_developer_guide_threshold(),
            architecture_threshold: default_architecture_threshold(),
            ignored_dirs: default_ignored_dirs(),
            binary_extensions: default_binary_extensions(),
            workspace_dir: default_workspace_dir(),
        }
    }
}

impl DocGenConfig {
    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }

    pub fn prompt_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.prompt_cache_ttl_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn repo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.repo_cache_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.repo_cleanup_interval_secs)
    }
}

/// 统一路径分隔符并去掉开头的 `./` 或 `/`
pub fn normalize_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut trimmed = normalized.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

/// 取路径的扩展名（小写）
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// 根据扩展名推断语言
pub fn detect_language(path: &str) -> &'static str {
    match extension_of(path).as_deref() {
        Some("js") | Some("mjs") | Some("cjs") | Some("jsx") => "javascript",
        Some("ts") | Some("tsx") => "typescript",
        Some("py") => "python",
        Some("rs") => "rust",
        Some("go") => "go",
        Some("java") => "java",
        Some("kt") => "kotlin",
        Some("rb") => "ruby",
        Some("php") => "php",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") => "cpp",
        Some("cs") => "csharp",
        Some("swift") => "swift",
        Some("scala") => "scala",
        Some("sh") | Some("bash") => "shell",
        Some("html") | Some("htm") => "html",
        Some("css") | Some("scss") => "css",
        Some("json") => "json",
        Some("yml") | Some("yaml") => "yaml",
        Some("toml") => "toml",
        Some("md") => "markdown",
        _ => "text",
    }
}
