//! 步骤执行器
//!
//! 将 step.action 解析为注册的工具（未注册时走模拟路径），在步骤截止时间与取消令牌下执行；
//! 无论成败都追加一条 ExecutionRecord 并输出结构化审计日志（JSON），然后把错误原样交还调用方。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::ToolsSection;
use crate::core::AgentError;
use crate::planner::Step;
use crate::tools::{StepOutput, ToolRegistry};

/// 单次执行记录（只追加，不修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step: Step,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// 毫秒时间戳
    pub timestamp: i64,
    pub success: bool,
}

impl ExecutionRecord {
    pub fn success(step: Step, result: StepOutput, duration_ms: u64) -> Self {
        Self {
            success: result.success,
            step,
            result: Some(result),
            error: None,
            duration_ms,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn failure(step: Step, error: &AgentError, duration_ms: u64) -> Self {
        Self {
            step,
            result: None,
            error: Some(error.to_string()),
            duration_ms,
            timestamp: chrono::Utc::now().timestamp_millis(),
            success: false,
        }
    }
}

/// 执行统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

/// 动作别名 -> 注册键；未列出的动作名原样作为注册键
pub fn resolve_action(action: &str) -> &str {
    match action {
        "execute" | "shell" | "bash" => "shell",
        "read_file" => "file_read",
        "write_file" => "file_write",
        "check_file" => "file_exists",
        other => other,
    }
}

pub struct Executor {
    registry: Arc<ToolRegistry>,
    step_timeout: Duration,
    simulated_delay: Duration,
    history: Mutex<Vec<ExecutionRecord>>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, step_timeout: Duration, simulated_delay: Duration) -> Self {
        Self {
            registry,
            step_timeout,
            simulated_delay,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(registry: Arc<ToolRegistry>, cfg: &ToolsSection) -> Self {
        Self::new(
            registry,
            Duration::from_secs(cfg.step_timeout_secs),
            Duration::from_millis(cfg.simulated_delay_ms),
        )
    }

    pub async fn execute(
        &self,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, AgentError> {
        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = tokio::time::timeout(self.step_timeout, self.dispatch(step)) => match r {
                Ok(inner) => inner,
                Err(_) => Err(AgentError::ToolTimeout(format!(
                    "step '{}' exceeded {}s",
                    step.id,
                    self.step_timeout.as_secs()
                ))),
            },
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(out) if out.success => "ok",
            Ok(_) => "soft_failure",
            Err(AgentError::Cancelled) => "cancelled",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = json!({
            "event": "tool_audit",
            "step": step.id,
            "action": step.action,
            "tool": resolve_action(&step.action),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": params_preview(&step.params),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        let record = match &result {
            Ok(out) => ExecutionRecord::success(step.clone(), out.clone(), duration_ms),
            Err(e) => ExecutionRecord::failure(step.clone(), e, duration_ms),
        };
        if let Ok(mut history) = self.history.lock() {
            history.push(record);
        }
        result
    }

    async fn dispatch(&self, step: &Step) -> Result<StepOutput, AgentError> {
        if step.skipped {
            return Ok(StepOutput::ok(json!({ "skipped": true, "step": step.id })));
        }
        match self.registry.get(resolve_action(&step.action)) {
            Some(tool) => tool.execute(step).await,
            None => self.simulate(step).await,
        }
    }

    /// 没有对应工具的概念性步骤：短暂延迟后回显描述，始终成功
    async fn simulate(&self, step: &Step) -> Result<StepOutput, AgentError> {
        tracing::debug!(step = %step.id, action = %step.action, "simulated execution");
        tokio::time::sleep(self.simulated_delay).await;
        Ok(StepOutput::ok(json!({
            "simulated": true,
            "action": step.action,
            "result": step.description,
        })))
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let history = self.history();
        let total = history.len();
        let successful = history.iter().filter(|r| r.success).count();
        let total_ms: u64 = history.iter().map(|r| r.duration_ms).sum();
        let (success_rate, average_duration_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                successful as f64 / total as f64,
                total_ms as f64 / total as f64,
            )
        };
        ExecutorStats {
            total,
            successful,
            failed: total - successful,
            success_rate,
            average_duration_ms,
        }
    }
}

/// 审计日志里参数的截断预览（按字符计）
const PREVIEW_CHARS: usize = 200;

fn params_preview(params: &serde_json::Map<String, serde_json::Value>) -> String {
    let s = serde_json::Value::Object(params.clone()).to_string();
    if s.chars().count() > PREVIEW_CHARS {
        format!("{}...", s.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
