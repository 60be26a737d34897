//! LLM Prompt 模板
//!
//! 每种文档类型一个模板，另有逐文件文档模板。
//! 模板中的 `{xxx}` 占位符由 `format_*` 函数一次性替换。

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::chunker::{is_config_or_manifest, looks_like_api, truncate_file};
use super::types::{Chunk, DocType, FileRecord, GenerationContext};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"));

/// 单遍替换模板占位符，替换进来的文本不会再被展开；未知占位符原样保留
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// 项目概览 Prompt
pub const OVERVIEW_PROMPT: &str = r#"You are writing the README for a software project.

{context}
Project structure ({file_count} files):
{structure}

Selected file contents:
{files}

Write a project overview in Markdown with these sections:
1. Project name and a one-paragraph summary
2. Key features
3. Technology stack (languages, frameworks, notable dependencies)
4. Directory layout with a short description of each top-level directory
5. Quick start

Only describe what is visible in the files above. Do not invent features."#;

/// API 参考 Prompt
pub const API_REFERENCE_PROMPT: &str = r#"You are documenting the API surface of a software project.

{context}
Project structure ({file_count} files):
{structure}

Routing, controller and handler files:
{files}

Write an API reference in Markdown. For every endpoint defined in the code list:
- HTTP method and path
- Purpose
- Request parameters and body
- Response shape
- Authentication requirements, if any

Group endpoints by module. List only endpoints that are explicitly defined above."#;

/// 安装配置指南 Prompt
pub const SETUP_GUIDE_PROMPT: &str = r#"You are writing the setup guide for a software project.

{context}
Project structure ({file_count} files):
{structure}

Manifests and configuration files:
{files}

Write a setup guide in Markdown covering:
1. Prerequisites and required tool versions
2. Installing dependencies
3. Configuration (environment variables, config files and their keys)
4. Running the project locally
5. Running tests, if a test setup is visible

Base every command on the manifests above."#;

/// 开发者指南 Prompt
pub const DEVELOPER_GUIDE_PROMPT: &str = r#"You are writing the developer guide for a software project.

{context}
Project structure ({file_count} files):
{structure}

Representative source files:
{files}

Write a developer guide in Markdown covering:
1. Code organization and module responsibilities
2. Coding conventions observed in the code
3. How to add a new feature end to end
4. Testing approach
5. Common pitfalls visible in the code"#;

/// 架构文档 Prompt
pub const ARCHITECTURE_PROMPT: &str = r#"You are documenting the architecture of a software project.

{context}
Project structure ({file_count} files):
{structure}

Representative source files:
{files}

Write an architecture document in Markdown covering:
1. High-level component diagram (as a Mermaid flowchart)
2. Responsibilities of each component
3. Data flow for the main use cases
4. External dependencies and integration points
5. Design decisions that are evident from the code"#;

/// 逐文件文档 Prompt
pub const FILE_DOCS_PROMPT: &str = r#"Document each of the following source files (batch {chunk_index} of {chunk_count}).

{context}
{files}

For every file, write a Markdown section headed by the file path containing:
- Purpose of the file
- Main classes, functions and constants with one-line descriptions
- Dependencies on other files
- Notable logic worth explaining

Keep each section concise and keep the files in the order given."#;

/// 每种文档类型的模板
pub fn template_for(doc_type: DocType) -> &'static str {
    match doc_type {
        DocType::Overview => OVERVIEW_PROMPT,
        DocType::ApiReference => API_REFERENCE_PROMPT,
        DocType::SetupGuide => SETUP_GUIDE_PROMPT,
        DocType::DeveloperGuide => DEVELOPER_GUIDE_PROMPT,
        DocType::Architecture => ARCHITECTURE_PROMPT,
        DocType::FileDocs => FILE_DOCS_PROMPT,
    }
}

/// 格式化项目结构（每行一个路径）
pub fn format_project_structure(files: &[FileRecord]) -> String {
    files
        .iter()
        .map(|f| format!("- {}", f.path))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 格式化生成上下文，为空时返回空串
pub fn format_context(context: &GenerationContext) -> String {
    if context.is_empty() {
        return String::new();
    }

    let mut out = String::from("Additional context:\n");
    for (key, value) in context {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!("- {}: {}\n", key, rendered));
    }
    out
}

/// 格式化单个文件（内容按 `max_chars_per_file` 截断）
pub fn format_file_block(file: &FileRecord, max_chars_per_file: usize) -> String {
    let capped = truncate_file(file, max_chars_per_file);
    format!(
        "### {}\n```{}\n{}\n```\n",
        capped.path,
        capped.language(),
        capped.content
    )
}

/// 按总预算拼接文件内容，超出预算后停止
pub fn format_files_within_budget<'a>(
    files: impl IntoIterator<Item = &'a FileRecord>,
    max_chars_per_file: usize,
    budget: usize,
) -> String {
    let mut out = String::new();
    for file in files {
        let block = format_file_block(file, max_chars_per_file);
        if !out.is_empty() && out.len() + block.len() > budget {
            break;
        }
        out.push_str(&block);
        out.push('\n');
    }
    out
}

/// 文档类型关注的文件
fn relevant_files(doc_type: DocType, files: &[FileRecord]) -> Vec<&FileRecord> {
    let picked: Vec<&FileRecord> = match doc_type {
        DocType::ApiReference => files.iter().filter(|f| looks_like_api(&f.path)).collect(),
        DocType::SetupGuide => files.iter().filter(|f| is_config_or_manifest(f)).collect(),
        _ => files.iter().collect(),
    };

    if picked.is_empty() {
        files.iter().collect()
    } else {
        picked
    }
}

/// 构建文档类型 Prompt
pub fn format_doc_type_prompt(
    doc_type: DocType,
    files: &[FileRecord],
    context: &GenerationContext,
    max_chars_per_file: usize,
    budget: usize,
) -> String {
    let excerpts = format_files_within_budget(
        relevant_files(doc_type, files),
        max_chars_per_file,
        budget,
    );

    fill_template(
        template_for(doc_type),
        &[
            ("context", format_context(context).as_str()),
            ("file_count", files.len().to_string().as_str()),
            ("structure", format_project_structure(files).as_str()),
            ("files", excerpts.as_str()),
        ],
    )
}

/// 构建逐文件文档 Prompt（`chunk_index` 从 1 开始）
pub fn format_file_docs_prompt(
    chunk: &Chunk,
    chunk_index: usize,
    chunk_count: usize,
    context: &GenerationContext,
    max_chars_per_file: usize,
) -> String {
    let files = chunk
        .files
        .iter()
        .map(|f| format_file_block(f, max_chars_per_file))
        .collect::<Vec<_>>()
        .join("\n");

    fill_template(
        FILE_DOCS_PROMPT,
        &[
            ("chunk_index", chunk_index.to_string().as_str()),
            ("chunk_count", chunk_count.to_string().as_str()),
            ("context", format_context(context).as_str()),
            ("files", files.as_str()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_doc_type_prompt_includes_structure_and_content() {
        let files = vec![FileRecord::new("a.js", "function f(){}")];
        let prompt = format_doc_type_prompt(DocType::Overview, &files, &GenerationContext::new(), 100, 1000);
        assert!(prompt.contains("- a.js"));
        assert!(prompt.contains("function f(){}"));
        assert!(prompt.contains("(1 files)"));
        assert!(!prompt.contains("Additional context"));
    }

    #[test]
    fn test_context_rendered_when_present() {
        let mut ctx = GenerationContext::new();
        ctx.insert("projectName".into(), json!("demo"));
        let prompt = format_doc_type_prompt(DocType::Overview, &[FileRecord::new("a.js", "x")], &ctx, 100, 1000);
        assert!(prompt.contains("- projectName: demo"));
    }

    #[test]
    fn test_per_file_cap_applies() {
        let file = FileRecord::new("big.rs", "y".repeat(500));
        let block = format_file_block(&file, 50);
        assert!(block.contains(&"y".repeat(50)));
        assert!(!block.contains(&"y".repeat(51)));
        assert!(block.contains("[truncated]"));
    }

    #[test]
    fn test_api_prompt_prefers_route_files() {
        let files = vec![
            FileRecord::new("src/util.js", "UTIL_BODY"),
            FileRecord::new("src/routes/users.js", "ROUTE_BODY"),
        ];
        let prompt = format_doc_type_prompt(DocType::ApiReference, &files, &GenerationContext::new(), 100, 1000);
        assert!(prompt.contains("ROUTE_BODY"));
        assert!(!prompt.contains("UTIL_BODY"));
    }

    #[test]
    fn test_budget_stops_adding_files() {
        let files: Vec<_> = (0..10).map(|i| FileRecord::new(format!("f{}.rs", i), "z".repeat(100))).collect();
        let excerpts = format_files_within_budget(&files, 1000, 250);
        assert!(excerpts.contains("f0.rs"));
        assert!(!excerpts.contains("f9.rs"));
    }

    #[test]
    fn test_file_docs_prompt_numbering() {
        let chunk = Chunk { files: vec![FileRecord::new("a.js", "x")] };
        let prompt = format_file_docs_prompt(&chunk, 2, 3, &GenerationContext::new(), 100);
        assert!(prompt.contains("batch 2 of 3"));
        assert!(prompt.contains("### a.js"));
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let mut ctx = GenerationContext::new();
        ctx.insert("note".into(), json!("see {files} and {structure}"));
        let files = vec![FileRecord::new("src/{files}.js", "BODY")];

        let prompt = format_doc_type_prompt(DocType::Overview, &files, &ctx, 100, 1000);
        assert!(prompt.contains("- note: see {files} and {structure}"));
        assert_eq!(prompt.matches("BODY").count(), 1);

        let chunk = Chunk { files };
        let prompt = format_file_docs_prompt(&chunk, 1, 1, &ctx, 100);
        assert!(prompt.contains("### src/{files}.js"));
        assert_eq!(prompt.matches("BODY").count(), 1);
    }

    #[test]
    fn test_fill_template_keeps_unknown_placeholders() {
        assert_eq!(fill_template("{a}-{b}", &[("a", "{b}")]), "{b}-{b}");
    }

    #[test]
    fn test_declared_language_used_for_fence() {
        let file = FileRecord::new("build_script", "echo hi").with_language(Some("shell"));
        assert!(format_file_block(&file, 100).contains("```shell\necho hi"));
        assert!(format_file_block(&FileRecord::new("build_script", "x"), 100).contains("```text\n"));
    }
}
