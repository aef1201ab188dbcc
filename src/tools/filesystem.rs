//! 文件工具
//!
//! Workspace 可选绑定根目录：相对路径拼到根下，并按路径分量做词法规整，禁止 ../ 逃逸。
//! file_read / file_write / file_exists 缺少 path（写入还需 content）时直接报错。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;

use crate::core::AgentError;
use crate::planner::Step;
use crate::tools::{StepOutput, Tool};

/// 文件工具的路径解析范围；无根目录时按进程当前目录解析
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    root: Option<PathBuf>,
}

impl Workspace {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// 解析路径；有根目录时结果必须落在根下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(path));
        };
        let joined = root.join(path.trim_start_matches("./"));
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(AgentError::PathEscape(path.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }
        if normalized.starts_with(root) {
            Ok(normalized)
        } else {
            Err(AgentError::PathEscape(path.to_string())) // 如 ../../etc/passwd
        }
    }
}

fn required<'a>(step: &'a Step, field: &'static str) -> Result<&'a str, AgentError> {
    step.param_str(field).ok_or_else(|| AgentError::MissingField {
        step: step.id.clone(),
        action: step.action.clone(),
        field,
    })
}

/// I/O 错误带上错误码关键词，供恢复分类使用
fn io_failure(e: std::io::Error, path: &str) -> AgentError {
    let detail = match e.kind() {
        std::io::ErrorKind::NotFound => format!("ENOENT: not found: {}", path),
        std::io::ErrorKind::PermissionDenied => format!("EACCES: permission denied: {}", path),
        _ => format!("{}: {}", path, e),
    };
    AgentError::ToolExecutionFailed(detail)
}

pub struct FileReadTool {
    workspace: Workspace,
}

impl FileReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read file contents. Params: {\"path\": \"file path\"}"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        let path = required(step, "path")?;
        let resolved = self.workspace.resolve(path)?;
        tracing::info!(path = %resolved.display(), "file_read");
        let content = fs::read_to_string(&resolved)
            .await
            .map_err(|e| io_failure(e, path))?;
        Ok(StepOutput::ok(json!({ "path": path, "content": content })))
    }
}

pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write a file, creating parent directories. Params: {\"path\": \"...\", \"content\": \"...\"}"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        let path = required(step, "path")?;
        let content = required(step, "content")?;
        let resolved = self.workspace.resolve(path)?;
        tracing::info!(path = %resolved.display(), bytes = content.len(), "file_write");
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure(e, path))?;
        }
        fs::write(&resolved, content)
            .await
            .map_err(|e| io_failure(e, path))?;
        Ok(StepOutput::ok(json!({ "path": path, "bytes": content.len() })))
    }
}

pub struct FileExistsTool {
    workspace: Workspace,
}

impl FileExistsTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileExistsTool {
    fn name(&self) -> &str {
        "file_exists"
    }

    fn description(&self) -> &str {
        "Check whether a path exists. Params: {\"path\": \"...\"}"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        let path = required(step, "path")?;
        let resolved = self.workspace.resolve(path)?;
        let exists = fs::metadata(&resolved).await.is_ok();
        Ok(StepOutput::ok(json!({ "path": path, "exists": exists })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ws(dir: &TempDir) -> Workspace {
        Workspace::new(Some(dir.path().to_path_buf()))
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let ws = ws(&dir);
        assert!(ws.resolve("a/../b.txt").unwrap().starts_with(dir.path()));
        assert!(matches!(
            ws.resolve("../../etc/passwd"),
            Err(AgentError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_and_exists() {
        let dir = TempDir::new().unwrap();
        let write = Step::new("w", "write_file", "save")
            .with_param("path", json!("notes/a.txt"))
            .with_param("content", json!("hello"));
        FileWriteTool::new(ws(&dir)).execute(&write).await.unwrap();

        let read = Step::new("r", "read_file", "load").with_param("path", json!("notes/a.txt"));
        let out = FileReadTool::new(ws(&dir)).execute(&read).await.unwrap();
        assert_eq!(out.output["content"], "hello");

        let check = Step::new("c", "check_file", "check").with_param("path", json!("notes/a.txt"));
        let out = FileExistsTool::new(ws(&dir)).execute(&check).await.unwrap();
        assert_eq!(out.output["exists"], true);
    }

    #[tokio::test]
    async fn test_missing_fields_are_errors() {
        let dir = TempDir::new().unwrap();
        let no_content = Step::new("w", "write_file", "save").with_param("path", json!("x.txt"));
        let err = FileWriteTool::new(ws(&dir)).execute(&no_content).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingField { field: "content", .. }));

        let err = FileReadTool::new(ws(&dir))
            .execute(&Step::new("r", "read_file", "load"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingField { field: "path", .. }));
    }

    #[tokio::test]
    async fn test_read_missing_file_reports_enoent() {
        let dir = TempDir::new().unwrap();
        let read = Step::new("r", "read_file", "load").with_param("path", json!("nope.txt"));
        let err = FileReadTool::new(ws(&dir)).execute(&read).await.unwrap_err();
        assert!(err.to_string().contains("ENOENT"));
    }
}
