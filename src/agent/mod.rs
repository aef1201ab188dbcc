//! Agent 运行时
//!
//! 单个 Agent 把 Memory + Planner + Executor 串成一次任务生命周期：
//! 召回 -> 规划 -> 逐步执行（含重新规划与失败恢复）-> 存储。
//! AgentComponents 里的三者为进程级共享（Arc），reset 不会清空它们的缓存。

pub mod runtime;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::core::Task;
use crate::memory::MemoryStore;
use crate::planner::Planner;
use crate::tools::{ExecutionRecord, Executor, ToolRegistry};

pub use runtime::AgentRuntime;

/// 生命周期状态：idle -> planning -> executing -> completed | error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Planning,
    Executing,
    Completed,
    Error,
}

/// 单个 Agent 的可变状态，只由该 Agent 自己的生命周期方法修改
#[derive(Debug, Clone)]
pub struct AgentRuntimeState {
    pub status: AgentStatus,
    pub current_task: Option<Task>,
    pub iteration: usize,
    /// 毫秒时间戳
    pub start_time: Option<i64>,
    pub results: Vec<ExecutionRecord>,
}

impl Default for AgentRuntimeState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Idle,
            current_task: None,
            iteration: 0,
            start_time: None,
            results: Vec::new(),
        }
    }
}

/// 任务结果：execute 从不返回 Err，失败以 success = false + error 表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub results: Vec<ExecutionRecord>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// 最后一个成功步骤的输出
    #[serde(default)]
    pub output: Value,
}

/// 可在多个 Agent 之间共享的组件
#[derive(Clone)]
pub struct AgentComponents {
    pub memory: Arc<MemoryStore>,
    pub planner: Arc<Planner>,
    pub executor: Arc<Executor>,
}

impl AgentComponents {
    pub fn new(memory: Arc<MemoryStore>, planner: Arc<Planner>, executor: Arc<Executor>) -> Self {
        Self {
            memory,
            planner,
            executor,
        }
    }

    /// 按配置构建：内置工具、目录持久化的记忆、规划器
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::with_registry(cfg, ToolRegistry::with_defaults(&cfg.tools))
    }

    /// 使用调用方提供的工具注册表（可注册自定义工具）
    pub fn with_registry(cfg: &AppConfig, registry: ToolRegistry) -> Self {
        Self {
            memory: Arc::new(MemoryStore::with_dir(&cfg.memory.dir, cfg.memory.hot_cache_size)),
            planner: Arc::new(Planner::new(cfg.planner.seconds_per_step)),
            executor: Arc::new(Executor::from_config(Arc::new(registry), &cfg.tools)),
        }
    }
}
