//! 缓存键计算
//!
//! 结果缓存按 (文件集合, 上下文) 取指纹，Prompt 缓存按 (文档类型, 结构哈希, 上下文哈希)
//! 以及 Prompt 原文取哈希。

use sha2::{Digest, Sha256};

use super::types::{normalize_path, DocType, FileRecord, GenerationContext, InlineFile};

/// 上下文的规范化 JSON（键有序）
fn canonical_context(context: &GenerationContext) -> String {
    serde_json::to_string(context).unwrap_or_default()
}

fn fingerprint_entries<P: AsRef<str>>(
    entries: impl IntoIterator<Item = (P, usize)>,
    context: &GenerationContext,
) -> String {
    let mut hasher = Sha256::new();
    for (path, len) in entries {
        hasher.update(path.as_ref().as_bytes());
        hasher.update(b":");
        hasher.update(len.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"|");
    hasher.update(canonical_context(context).as_bytes());
    hex::encode(hasher.finalize())
}

/// 文件集合与上下文的指纹
///
/// 只取路径和内容长度，不读内容本身。
pub fn fingerprint(files: &[FileRecord], context: &GenerationContext) -> String {
    fingerprint_entries(files.iter().map(|f| (f.path.as_str(), f.content.len())), context)
}

/// 内联提交的文件在过滤前取指纹
pub fn fingerprint_inline(files: &[InlineFile], context: &GenerationContext) -> String {
    fingerprint_entries(
        files.iter().map(|f| (normalize_path(&f.path), f.content.len())),
        context,
    )
}

/// 仓库结构哈希（按路径排序的路径和内容摘要）
///
/// 缓存的 Prompt 文本内嵌文件内容，因此内容变化即使长度不变也要换键。
pub fn structure_hash(files: &[FileRecord]) -> String {
    let mut entries: Vec<(&str, String)> = files
        .iter()
        .map(|f| {
            let mut digest = Sha256::new();
            digest.update(f.language().as_bytes());
            digest.update(b"\0");
            digest.update(f.content.as_bytes());
            (f.path.as_str(), hex::encode(digest.finalize()))
        })
        .collect();
    entries.sort_unstable();

    let mut hasher = Sha256::new();
    for (path, digest) in entries {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

pub fn context_hash(context: &GenerationContext) -> String {
    hex::encode(Sha256::digest(canonical_context(context).as_bytes()))
}

/// Prompt 文本缓存键
pub fn prompt_cache_key(doc_type: DocType, structure: &str, context: &str) -> String {
    format!("{}:{}:{}", doc_type.as_str(), structure, context)
}

/// Prompt 内容哈希，用作远程调用结果缓存键
pub fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}
