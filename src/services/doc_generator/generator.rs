//! 文档产物组装
//!
//! 把各次远程调用返回的文本整理成以文件名为键的产物集合，并渲染成单个 Markdown 文档。

use chrono::Local;

use super::types::{Artifact, ArtifactMetadata, ArtifactSet, DocType};

const ARTIFACT_KIND: &str = "documentation";
const ARTIFACT_FORMAT: &str = "markdown";

/// 生成单个产物
pub fn make_artifact(doc_type: DocType, content: String, generated: &str) -> Artifact {
    Artifact {
        content,
        metadata: ArtifactMetadata {
            generated: generated.to_string(),
            kind: ARTIFACT_KIND.to_string(),
            format: ARTIFACT_FORMAT.to_string(),
            doc_type,
        },
    }
}

/// 合并各批次的逐文件文档
pub fn merge_file_docs(parts: &[String]) -> String {
    let mut out = format!("# {}\n\n", DocType::FileDocs.title());
    out.push_str(
        &parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
    );
    out.push('\n');
    out
}

/// 组装产物集合
///
/// 同一次生成的所有产物共用一个时间戳。没有逐文件文档时不生成对应产物。
pub fn assemble_artifacts(doc_outputs: Vec<(DocType, String)>, file_doc_parts: &[String]) -> ArtifactSet {
    let generated = Local::now().to_rfc3339();
    let mut artifacts = ArtifactSet::new();

    for (doc_type, content) in doc_outputs {
        artifacts.insert(
            doc_type.filename().to_string(),
            make_artifact(doc_type, content, &generated),
        );
    }

    if !file_doc_parts.is_empty() {
        artifacts.insert(
            DocType::FileDocs.filename().to_string(),
            make_artifact(DocType::FileDocs, merge_file_docs(file_doc_parts), &generated),
        );
    }

    artifacts
}

/// 渲染为单个 Markdown 文档（按文档类型的规范顺序）
pub fn render_markdown(artifacts: &ArtifactSet) -> String {
    let mut ordered: Vec<(&String, &Artifact)> = artifacts.iter().collect();
    ordered.sort_by_key(|(_, artifact)| artifact.metadata.doc_type);

    ordered
        .into_iter()
        .map(|(name, artifact)| format!("<!-- {} -->\n{}", name, artifact.content.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
