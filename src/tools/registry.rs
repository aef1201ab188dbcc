//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / execute），由 ToolRegistry 按动作名注册与查找；
//! 新增能力只需注册新键，Executor 的分发逻辑不变。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ToolsSection;
use crate::core::AgentError;
use crate::planner::Step;
use crate::tools::{
    AnalyzeCodeTool, FileExistsTool, FileReadTool, FileWriteTool, GenerateCodeTool, ShellTool,
    Workspace,
};

/// 工具执行结果；success = false 表示软失败（如 shell 非零退出），调用方仍可查看输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub success: bool,
    pub output: Value,
    /// 非空时要求 AgentRuntime 以该问题重新规划剩余步骤
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_replanning: Option<String>,
}

impl StepOutput {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            needs_replanning: None,
        }
    }

    pub fn failed(output: Value) -> Self {
        Self {
            success: false,
            output,
            needs_replanning: None,
        }
    }

    pub fn with_replanning(mut self, issue: impl Into<String>) -> Self {
        self.needs_replanning = Some(issue.into());
        self
    }
}

/// 工具 trait：名称、描述、异步执行（参数取自 step.params）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 默认注册键
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 缺少必填字段返回 Err（致命于该步骤）；其余失败由工具自行决定软失败或 Err
    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError>;
}

/// 工具注册表：按动作名存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置工具：shell、file_read、file_write、file_exists、analyze_code、generate_code
    pub fn with_defaults(cfg: &ToolsSection) -> Self {
        let workspace = Workspace::new(cfg.workspace_root.clone());
        let mut registry = Self::new();
        registry.register(ShellTool::new(
            cfg.shell_timeout_ms,
            cfg.max_output_bytes,
            workspace.clone(),
        ));
        registry.register(FileReadTool::new(workspace.clone()));
        registry.register(FileWriteTool::new(workspace.clone()));
        registry.register(FileExistsTool::new(workspace));
        registry.register(AnalyzeCodeTool);
        registry.register(GenerateCodeTool);
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// 以指定动作名注册（可覆盖内置工具）
    pub fn register_as(&mut self, action: impl Into<String>, tool: impl Tool + 'static) {
        self.tools.insert(action.into(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect();
        list.sort();
        list
    }
}
