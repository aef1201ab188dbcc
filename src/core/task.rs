//! 任务：不可变输入，内容键用于计划缓存与记忆
//!
//! 内容键 = SHA-256(规范化 JSON) 的前 16 字节（128 位）十六进制；
//! serde_json::Map 按键排序序列化，相同内容必得相同键。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// 任务描述：纯文本或结构化 JSON（可携带显式 steps 列表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskDescription {
    Text(String),
    Structured(Value),
}

impl TaskDescription {
    /// 用于分类的文本：结构化描述优先取 description / title 字段，否则取整体 JSON
    pub fn text(&self) -> String {
        match self {
            TaskDescription::Text(s) => s.clone(),
            TaskDescription::Structured(v) => ["description", "title", "task"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| v.to_string()),
        }
    }

    /// 结构化描述中的显式步骤
    pub fn explicit_steps(&self) -> Option<&Vec<Value>> {
        match self {
            TaskDescription::Text(_) => None,
            TaskDescription::Structured(v) => v.get("steps").and_then(Value::as_array),
        }
    }
}

impl From<&str> for TaskDescription {
    fn from(s: &str) -> Self {
        TaskDescription::Text(s.to_string())
    }
}

impl From<String> for TaskDescription {
    fn from(s: String) -> Self {
        TaskDescription::Text(s)
    }
}

/// 任务提交格式：`{ task, context?, constraints? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "task")]
    pub description: TaskDescription,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
}

impl Task {
    pub fn new(description: impl Into<TaskDescription>) -> Self {
        Self {
            description: description.into(),
            context: Map::new(),
            constraints: Map::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    /// 内容键（计划缓存键 = 记忆键）
    pub fn key(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(&digest[..16])
    }
}
