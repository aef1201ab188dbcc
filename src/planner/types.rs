//! 计划类型定义
//!
//! Plan 由 Planner 生成并缓存，交给 AgentRuntime 执行；Step 的 action 在执行时才解析到具体工具。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::Task;

/// 任务复杂度（声明顺序即大小顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// 计划置信度：越复杂越低
    pub fn confidence(self) -> f64 {
        match self {
            Complexity::Simple => 0.9,
            Complexity::Medium => 0.8,
            Complexity::Complex => 0.7,
        }
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Feature,
    Bugfix,
    Refactoring,
    General,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Feature => write!(f, "feature"),
            TaskType::Bugfix => write!(f, "bugfix"),
            TaskType::Refactoring => write!(f, "refactoring"),
            TaskType::General => write!(f, "general"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// 计划中的单步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// 符号化动作名，执行时解析为工具
    pub action: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// 工具参数（command / path / content 等）
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
    /// false 时失败直接终止任务
    #[serde(default = "default_true")]
    pub allow_recovery: bool,
    /// 显式指定恢复策略（retry / alternative / skip）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
    #[serde(default)]
    pub alternative: bool,
    /// 替代步骤指向的原步骤 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_step: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl Step {
    pub fn new(id: impl Into<String>, action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            description: description.into(),
            dependencies: BTreeSet::new(),
            params: Map::new(),
            metadata: Map::new(),
            retry_count: 0,
            allow_recovery: true,
            recovery: None,
            alternative: false,
            original_step: None,
            skipped: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// 计划元信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub step_count: usize,
    pub complexity: Complexity,
    pub task_type: TaskType,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub task: Task,
    pub steps: Vec<Step>,
    pub estimated_duration_secs: u64,
    /// 毫秒时间戳
    pub created_at: i64,
    pub metadata: PlanMetadata,
    /// 命中计划缓存时为 true
    #[serde(default)]
    pub from_cache: bool,
    /// 规划时注入的上下文（记忆召回 + 任务自身 context）
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}
