//! 目录扫描器
//!
//! 在独立的阻塞线程上遍历源码目录，按批并行读取文件，
//! 过滤掉忽略目录、二进制文件和超大文件，返回扁平的文本文件列表。

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::types::{normalize_path, DocGenConfig, FileRecord, InlineFile};

/// 二进制嗅探时检查的前缀长度
const SNIFF_PREFIX_LEN: usize = 8192;

/// 不可打印字符占比上限
const MAX_NON_PRINTABLE_RATIO: f64 = 0.10;

/// 扫描请求（发往扫描线程的消息）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub root_path: PathBuf,
    pub ignored_dirs: Vec<String>,
    pub binary_extensions: Vec<String>,
    pub file_size_limit: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    256
}

impl ScanRequest {
    /// 按配置构造请求
    pub fn from_config(root_path: impl Into<PathBuf>, config: &DocGenConfig) -> Self {
        Self {
            root_path: root_path.into(),
            ignored_dirs: config.ignored_dirs.clone(),
            binary_extensions: config.binary_extensions.clone(),
            file_size_limit: config.max_file_size,
            batch_size: config.scan_batch_size,
        }
    }
}

/// 扫描线程的回复：文件列表或错误信息
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanResponse {
    Files(Vec<FileRecord>),
    Error { error: String },
}

/// 文件过滤规则
///
/// 目录扫描和内联提交的文件共用同一套规则。
#[derive(Debug, Clone)]
pub struct FileFilter {
    /// 编译后的忽略模式（glob patterns）
    ignore_patterns: Vec<glob::Pattern>,
    binary_extensions: HashSet<String>,
    max_file_size: u64,
}

impl FileFilter {
    pub fn new(ignored_dirs: &[String], binary_extensions: &[String], max_file_size: u64) -> Self {
        let ignore_patterns = ignored_dirs
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Invalid ignore pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            ignore_patterns,
            binary_extensions: binary_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_file_size,
        }
    }

    pub fn from_config(config: &DocGenConfig) -> Self {
        Self::new(&config.ignored_dirs, &config.binary_extensions, config.max_file_size)
    }

    /// 目录名是否在忽略列表中
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_patterns.iter().any(|p| p.matches(name))
    }

    /// 相对路径中是否包含被忽略的目录
    pub fn is_in_ignored_dir(&self, relative_path: &str) -> bool {
        let mut segments: Vec<&str> = relative_path.split('/').collect();
        segments.pop();
        segments.iter().any(|segment| self.is_ignored_dir(segment))
    }

    pub fn has_binary_extension(&self, path: &str) -> bool {
        super::types::extension_of(path)
            .map(|ext| self.binary_extensions.contains(&ext))
            .unwrap_or(false)
    }

    pub fn exceeds_size_limit(&self, size: u64) -> bool {
        size > self.max_file_size
    }

    /// 对原始字节做二进制判断，通过则返回解码后的文本
    pub fn decode_text(&self, path: &str, bytes: &[u8]) -> Option<String> {
        let prefix = &bytes[..bytes.len().min(SNIFF_PREFIX_LEN)];
        if let Some(kind) = detect_binary_signature(prefix) {
            debug!("Skipping binary file {} (signature: {})", path, kind);
            return None;
        }

        let text = String::from_utf8_lossy(bytes);
        if !is_mostly_printable(&text) {
            debug!("Skipping file with too many non-printable characters: {}", path);
            return None;
        }

        Some(text.into_owned())
    }

    /// 按扫描规则过滤内联提交的文件
    pub fn accept_inline(&self, file: &InlineFile) -> Option<FileRecord> {
        let path = normalize_path(&file.path);
        if path.is_empty() || self.is_in_ignored_dir(&path) || self.has_binary_extension(&path) {
            return None;
        }
        if self.exceeds_size_limit(file.content.len() as u64) {
            debug!("Skipping oversized inline file: {} ({} bytes)", path, file.content.len());
            return None;
        }

        let content = self.decode_text(&path, file.content.as_bytes())?;
        Some(FileRecord::new(path, content).with_language(file.language.as_deref()))
    }
}

/// 根据文件头魔数识别常见二进制格式
pub fn detect_binary_signature(prefix: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "png"),
        (b"\xff\xd8\xff", "jpeg"),
        (b"GIF87a", "gif"),
        (b"GIF89a", "gif"),
        (b"%PDF-", "pdf"),
        (b"PK\x03\x04", "zip"),
        (b"PK\x05\x06", "zip"),
        (b"\x1f\x8b", "gzip"),
        (b"BZh", "bzip2"),
        (b"\xfd7zXZ\x00", "xz"),
        (b"7z\xbc\xaf\x27\x1c", "7z"),
        (b"Rar!\x1a\x07", "rar"),
        (b"\x7fELF", "elf"),
        (b"\xfe\xed\xfa\xce", "mach-o"),
        (b"\xfe\xed\xfa\xcf", "mach-o"),
        (b"\xce\xfa\xed\xfe", "mach-o"),
        (b"\xcf\xfa\xed\xfe", "mach-o"),
        (b"\xca\xfe\xba\xbe", "java-class"),
        (b"\x00asm", "wasm"),
        (b"SQLite format 3\x00", "sqlite"),
        (b"OggS", "ogg"),
        (b"ID3", "mp3"),
        (b"wOFF", "woff"),
        (b"wOF2", "woff2"),
        (b"\x00\x00\x01\x00", "ico"),
    ];

    for (magic, kind) in SIGNATURES {
        if prefix.starts_with(magic) {
            return Some(kind);
        }
    }

    // RIFF 容器（wav/avi/webp）
    if prefix.len() >= 12 && prefix.starts_with(b"RIFF") {
        return Some("riff");
    }

    // PE 可执行文件：MZ 头且前 64 字节内有 NUL
    if prefix.starts_with(b"MZ") && prefix.iter().take(64).any(|b| *b == 0) {
        return Some("pe");
    }

    None
}

/// 不可打印字符占比（控制字符中除常见空白外的部分，以及解码失败的替换字符）
pub fn non_printable_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut non_printable = 0usize;

    for c in text.chars() {
        total += 1;
        let whitespace = matches!(c, '\n' | '\r' | '\t' | '\x0b' | '\x0c');
        if (c.is_control() && !whitespace) || c == char::REPLACEMENT_CHARACTER {
            non_printable += 1;
        }
    }

    if total == 0 {
        return 0.0;
    }
    non_printable as f64 / total as f64
}

pub fn is_mostly_printable(text: &str) -> bool {
    non_printable_ratio(text) <= MAX_NON_PRINTABLE_RATIO
}

/// 目录扫描器
pub struct DirectoryScanner {
    filter: FileFilter,
    batch_size: usize,
}

impl DirectoryScanner {
    /// 创建新的目录扫描器
    pub fn new(request: &ScanRequest) -> Self {
        Self {
            filter: FileFilter::new(
                &request.ignored_dirs,
                &request.binary_extensions,
                request.file_size_limit,
            ),
            batch_size: request.batch_size.max(1),
        }
    }

    /// 扫描目录（阻塞），`cancel` 置位后在下一批开始前退出
    pub fn scan(&self, root_path: &Path, cancel: &AtomicBool) -> Result<Vec<FileRecord>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        // 根目录不可读视为整体失败
        fs::read_dir(root_path).map_err(|e| ScanError::IoError(root_path.to_path_buf(), e))?;

        info!("Starting directory scan: {}", root_path.display());

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                let ignored = self.filter.is_ignored_dir(&name);
                if ignored {
                    debug!("Ignoring directory: {}", entry.path().display());
                }
                !ignored
            });

        let mut records = Vec::new();
        let mut batch: Vec<(PathBuf, String)> = Vec::with_capacity(self.batch_size);
        let mut skipped = 0usize;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relative_path = entry
                .path()
                .strip_prefix(root_path)
                .map(|p| normalize_path(&p.to_string_lossy()))
                .unwrap_or_default();

            if relative_path.is_empty() || self.filter.has_binary_extension(&relative_path) {
                skipped += 1;
                continue;
            }

            batch.push((entry.into_path(), relative_path));

            if batch.len() >= self.batch_size {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ScanError::Cancelled);
                }
                let before = records.len();
                self.process_batch(&mut batch, &mut records);
                skipped += self.batch_size - (records.len() - before);
            }
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }
        let pending = batch.len();
        let before = records.len();
        self.process_batch(&mut batch, &mut records);
        skipped += pending - (records.len() - before);

        info!("Scan completed: {} files kept, {} skipped", records.len(), skipped);
        Ok(records)
    }

    /// 并行处理一批文件，处理后清空批次
    fn process_batch(&self, batch: &mut Vec<(PathBuf, String)>, records: &mut Vec<FileRecord>) {
        let processed: Vec<Option<FileRecord>> = batch
            .par_iter()
            .map(|(path, relative_path)| self.read_file(path, relative_path))
            .collect();

        records.extend(processed.into_iter().flatten());
        batch.clear();
    }

    fn read_file(&self, path: &Path, relative_path: &str) -> Option<FileRecord> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                return None;
            }
        };

        // 跳过过大的文件
        if self.filter.exceeds_size_limit(metadata.len()) {
            debug!("Skipping oversized file: {} ({} bytes)", path.display(), metadata.len());
            return None;
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        let content = self.filter.decode_text(relative_path, &bytes)?;
        Some(FileRecord::new(relative_path, content))
    }
}

/// 在独立线程上执行扫描
///
/// 请求通过消息发送给扫描线程，结果经 oneshot 通道返回；超时后置位取消标志并返回错误，不重试。
pub async fn scan_in_worker(request: ScanRequest, timeout: Duration) -> Result<Vec<FileRecord>, ScanError> {
    let (reply_tx, reply_rx) = oneshot::channel::<ScanResponse>();
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);

    tokio::task::spawn_blocking(move || {
        let scanner = DirectoryScanner::new(&request);
        let response = match scanner.scan(&request.root_path, &worker_cancel) {
            Ok(files) => ScanResponse::Files(files),
            Err(e) => ScanResponse::Error { error: e.to_string() },
        };
        let _ = reply_tx.send(response);
    });

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(ScanResponse::Files(files))) => Ok(files),
        Ok(Ok(ScanResponse::Error { error })) => Err(ScanError::WorkerFailed(error)),
        Ok(Err(_)) => Err(ScanError::WorkerFailed("scan worker exited without a reply".to_string())),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            warn!("Directory scan timed out after {:?}", timeout);
            Err(ScanError::Timeout(timeout))
        }
    }
}

/// 扫描错误类型
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("路径不存在: {0}")]
    PathNotFound(PathBuf),

    #[error("路径不是目录: {0}")]
    NotADirectory(PathBuf),

    #[error("IO错误 ({0}): {1}")]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("扫描超时 ({0:?})")]
    Timeout(Duration),

    #[error("扫描已取消")]
    Cancelled,

    #[error("扫描失败: {0}")]
    WorkerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, relative: &str, bytes: &[u8]) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut file = File::create(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();

        write_file(dir.path(), "src/main.py", b"print('hello')");
        write_file(dir.path(), "src/utils/helper.py", b"def helper(): pass");

        // 应该被忽略的目录
        write_file(dir.path(), "node_modules/pkg/index.js", b"module.exports = {}");
        write_file(dir.path(), ".git/HEAD", b"ref: refs/heads/main");

        dir
    }

    fn request_for(dir: &Path) -> ScanRequest {
        ScanRequest::from_config(dir, &DocGenConfig::default())
    }

    fn scan_blocking(request: &ScanRequest) -> Vec<FileRecord> {
        DirectoryScanner::new(request)
            .scan(&request.root_path, &AtomicBool::new(false))
            .unwrap()
    }

    #[test]
    fn test_scan_directory() {
        let test_dir = create_test_dir();
        let files = scan_blocking(&request_for(test_dir.path()));

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.py", "src/utils/helper.py"]);
        assert_eq!(files[0].content, "print('hello')");
        assert_eq!(files[0].size, 14);
    }

    #[test]
    fn test_skips_oversized_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "small.txt", b"ok");
        write_file(dir.path(), "large.txt", &vec![b'a'; 2048]);

        let mut request = request_for(dir.path());
        request.file_size_limit = 1024;
        let files = scan_blocking(&request);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "small.txt");
    }

    #[test]
    fn test_skips_binary_extension() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "logo.png", b"definitely text but wrong extension");
        write_file(dir.path(), "app.js", b"console.log(1)");

        let files = scan_blocking(&request_for(dir.path()));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "app.js");
    }

    #[test]
    fn test_skips_magic_signature_without_extension() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "image", b"\x89PNG\r\n\x1a\nrest-of-file");
        write_file(dir.path(), "notes", b"plain notes");

        let files = scan_blocking(&request_for(dir.path()));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "notes");
    }

    #[test]
    fn test_skips_mostly_non_printable_file() {
        let dir = TempDir::new().unwrap();
        let mut noisy = b"abcdefgh".to_vec();
        noisy.extend_from_slice(&[0x01, 0x02, 0x03]);
        write_file(dir.path(), "blob.txt", &noisy);
        write_file(dir.path(), "text.txt", b"line one\n\tline two\r\n");

        let files = scan_blocking(&request_for(dir.path()));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "text.txt");
    }

    #[test]
    fn test_small_batches_keep_all_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..25 {
            write_file(dir.path(), &format!("dir{}/file{:02}.rs", i % 3, i), b"fn main() {}");
        }

        let mut request = request_for(dir.path());
        request.batch_size = 4;
        let files = scan_blocking(&request);

        assert_eq!(files.len(), 25);
        let unique: HashSet<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn test_missing_root_is_error() {
        let request = request_for(Path::new("/definitely/not/here"));
        let result = DirectoryScanner::new(&request).scan(&request.root_path, &AtomicBool::new(false));
        assert!(matches!(result, Err(ScanError::PathNotFound(_))));
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let test_dir = create_test_dir();
        let request = request_for(test_dir.path());
        let result = DirectoryScanner::new(&request).scan(&request.root_path, &AtomicBool::new(true));
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn test_non_printable_ratio() {
        assert_eq!(non_printable_ratio(""), 0.0);
        assert_eq!(non_printable_ratio("abc\n\t"), 0.0);
        assert!(non_printable_ratio("a\u{0}") > 0.4);
        assert!(is_mostly_printable("hello world\u{7}"));
    }

    #[test]
    fn test_detect_binary_signature() {
        assert_eq!(detect_binary_signature(b"%PDF-1.7"), Some("pdf"));
        assert_eq!(detect_binary_signature(b"\x7fELF\x02"), Some("elf"));
        assert_eq!(detect_binary_signature(b"MZ is a fine word"), None);
        assert_eq!(detect_binary_signature(b"fn main() {}"), None);
    }

    #[test]
    fn test_accept_inline_applies_scan_rules() {
        let filter = FileFilter::from_config(&DocGenConfig::default());
        let inline = |path: &str, content: &str| InlineFile {
            path: path.to_string(),
            content: content.to_string(),
            language: None,
        };

        assert!(filter.accept_inline(&inline("a.js", "function f(){}")).is_some());
        assert!(filter.accept_inline(&inline("node_modules/x/a.js", "x")).is_none());
        assert!(filter.accept_inline(&inline("logo.png", "x")).is_none());
        assert!(filter.accept_inline(&inline("weird.txt", "\u{1}\u{2}\u{3}ab")).is_none());

        let record = filter.accept_inline(&inline(".\\src\\b.ts", "let b = 1")).unwrap();
        assert_eq!(record.path, "src/b.ts");
        assert_eq!(record.language(), "typescript");
    }

    #[test]
    fn test_accept_inline_keeps_declared_language() {
        let filter = FileFilter::from_config(&DocGenConfig::default());
        let file = InlineFile {
            path: "build_script".to_string(),
            content: "echo hi".to_string(),
            language: Some("shell".to_string()),
        };

        let record = filter.accept_inline(&file).unwrap();
        assert_eq!(record.language.as_deref(), Some("shell"));
        assert_eq!(record.language(), "shell");
    }

    #[tokio::test]
    async fn test_scan_in_worker() {
        let test_dir = create_test_dir();
        let files = scan_in_worker(request_for(test_dir.path()), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_in_worker_timeout_is_terminal() {
        let dir = TempDir::new().unwrap();
        for i in 0..500 {
            write_file(dir.path(), &format!("pkg{}/mod{}.py", i % 20, i), b"def f():\n    return 1\n");
        }

        let result = scan_in_worker(request_for(dir.path()), Duration::ZERO).await;
        match result {
            Err(ScanError::Timeout(limit)) => assert_eq!(limit, Duration::ZERO),
            other => panic!("unexpected result: {:?}", other.map(|f| f.len())),
        }
    }

    #[tokio::test]
    async fn test_scan_in_worker_reports_error_message() {
        let result = scan_in_worker(request_for(Path::new("/definitely/not/here")), Duration::from_secs(10)).await;
        match result {
            Err(ScanError::WorkerFailed(message)) => assert!(message.contains("/definitely/not/here")),
            other => panic!("unexpected result: {:?}", other.map(|f| f.len())),
        }
    }

    #[test]
    fn test_scan_response_wire_format() {
        let error = serde_json::to_value(ScanResponse::Error { error: "boom".to_string() }).unwrap();
        assert_eq!(error, serde_json::json!({ "error": "boom" }));

        let files = serde_json::to_value(ScanResponse::Files(vec![FileRecord::new("a.js", "x")])).unwrap();
        assert!(files.is_array());
    }
}
