//! Hive - Rust 智能体任务编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务与内容键、生命周期事件、失败恢复
//! - **memory**: 按任务内容键的热缓存 + 持久化记忆
//! - **planner**: 任务分类、步骤模板、计划缓存、重新规划
//! - **tools**: 工具 trait 与注册表、shell / 文件 / 占位工具、步骤执行器
//! - **agent**: 单个 Agent 的任务生命周期状态机
//! - **flow**: 多阶段、多 Agent 工作流编排
//! - **observability**: tracing 初始化

pub mod agent;
pub mod config;
pub mod core;
pub mod flow;
pub mod memory;
pub mod observability;
pub mod planner;
pub mod tools;

pub use agent::{AgentComponents, AgentRuntime, AgentStatus, TaskResult};
pub use core::{AgentError, LifecycleEvent, Task};
pub use flow::{FlowOrchestrator, FlowResult, Workflow, WorkflowBuilder};
