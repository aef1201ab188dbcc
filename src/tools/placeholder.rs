//! 占位工具：analyze_code / generate_code，尚无真实实现，返回成功桩结果

use async_trait::async_trait;
use serde_json::json;

use crate::core::AgentError;
use crate::planner::Step;
use crate::tools::{StepOutput, Tool};

pub struct AnalyzeCodeTool;

#[async_trait]
impl Tool for AnalyzeCodeTool {
    fn name(&self) -> &str {
        "analyze_code"
    }

    fn description(&self) -> &str {
        "Code analysis placeholder (returns a stub result)"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        Ok(StepOutput::ok(json!({
            "tool": "analyze_code",
            "status": "stub",
            "summary": step.description,
        })))
    }
}

pub struct GenerateCodeTool;

#[async_trait]
impl Tool for GenerateCodeTool {
    fn name(&self) -> &str {
        "generate_code"
    }

    fn description(&self) -> &str {
        "Code generation placeholder (returns a stub result)"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        Ok(StepOutput::ok(json!({
            "tool": "generate_code",
            "status": "stub",
            "summary": step.description,
        })))
    }
}
