//! 多 Agent 工作流：有序阶段、并行 / 顺序执行、阶段间条件与结果传递

pub mod builder;
pub mod orchestrator;
pub mod types;

pub use builder::WorkflowBuilder;
pub use orchestrator::FlowOrchestrator;
pub use types::*;
