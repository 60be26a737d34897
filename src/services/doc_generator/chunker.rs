//! 文件分批与文档类型选择
//!
//! 根据仓库形态决定要生成哪些文档，并把文件列表切分成大小受限的批次。

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{Chunk, DocGenConfig, DocType, FileRecord};

/// 截断标记
pub const TRUNCATION_MARKER: &str = "\n\n... [truncated]";

/// 路由/控制器/API 代码的路径特征
static API_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^|[/_.\-])(api|apis|routes?|router|controllers?|endpoints?|handlers?|views)([/_.\-]|$)")
        .expect("API path pattern is valid")
});

/// 依赖清单和构建文件
const MANIFEST_FILES: &[&str] = &[
    "package.json",
    "cargo.toml",
    "requirements.txt",
    "setup.py",
    "setup.cfg",
    "pyproject.toml",
    "pipfile",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "gemfile",
    "composer.json",
    "makefile",
    "cmakelists.txt",
    "dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    ".env.example",
    "tsconfig.json",
];

const CONFIG_EXTENSIONS: &[&str] = &["yml", "yaml", "toml", "ini", "cfg", "conf"];

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_lowercase()
}

/// 路径是否像 API 代码
pub fn looks_like_api(path: &str) -> bool {
    API_PATH_RE.is_match(path)
}

/// 是否为配置文件或依赖清单
pub fn is_config_or_manifest(file: &FileRecord) -> bool {
    let name = basename(&file.path);
    if MANIFEST_FILES.contains(&name.as_str()) || name.contains("config") {
        return true;
    }
    file.extension()
        .map(|ext| CONFIG_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// 选择需要生成的文档类型（按规范顺序，不含逐文件文档）
pub fn select_doc_types(files: &[FileRecord], config: &DocGenConfig) -> Vec<DocType> {
    let mut types = vec![DocType::Overview];

    if files.iter().any(|f| looks_like_api(&f.path)) {
        types.push(DocType::ApiReference);
    }

    if files.iter().any(is_config_or_manifest) {
        types.push(DocType::SetupGuide);
    }

    if files.len() > config.developer_guide_threshold {
        types.push(DocType::DeveloperGuide);
    }

    let has_architecture_file = files
        .iter()
        .any(|f| basename(&f.path).contains("architecture"));
    if has_architecture_file || files.len() > config.architecture_threshold {
        types.push(DocType::Architecture);
    }

    types
}

/// 按字符边界截断到不超过 `max_len` 字节
pub fn truncate_at_char_boundary(content: &str, max_len: usize) -> &str {
    if content.len() <= max_len {
        return content;
    }
    let mut end = max_len;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// 截断单个文件内容并追加截断标记
pub fn truncate_file(file: &FileRecord, max_len: usize) -> FileRecord {
    if file.content.len() <= max_len {
        return file.clone();
    }
    let content = format!("{}{}", truncate_at_char_boundary(&file.content, max_len), TRUNCATION_MARKER);
    FileRecord {
        path: file.path.clone(),
        size: file.size,
        content,
        language: file.language.clone(),
    }
}

/// 按输入顺序把文件累积到批次中，超出预算时开启新批次
///
/// 单个文件本身超出预算时单独成批，内容截断到预算长度并附加截断标记。
pub fn chunk_by_size(files: &[FileRecord], budget: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current = Chunk::default();
    let mut current_len = 0usize;

    for file in files {
        let len = file.content.len();

        if len > budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.push(Chunk {
                files: vec![truncate_file(file, budget)],
            });
            continue;
        }

        if current_len + len > budget && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        current.files.push(file.clone());
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
