//! 错误恢复引擎
//!
//! 根据失败步骤的错误信息选择恢复策略（retry / alternative / skip），并生成替换失败步骤的恢复步骤。

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::planner::Step;
use crate::tools::ExecutionRecord;

/// 未命中任何关键词时，前几次按 retry 处理，之后改为 alternative
const PLAIN_RETRY_LIMIT: u32 = 2;

const RETRY_PATTERNS: &[&str] = &["timeout", "timed out", "network", "econnrefused"];
const ALTERNATIVE_PATTERNS: &[&str] = &["not found", "enoent"];
const SKIP_PATTERNS: &[&str] = &["permission", "eacces"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    /// 原样重试，retry_count + 1
    Retry,
    /// 换一种方式完成同一步骤
    Alternative,
    /// 跳过：不做任何工作并视为成功
    Skip,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Retry => write!(f, "retry"),
            RecoveryStrategy::Alternative => write!(f, "alternative"),
            RecoveryStrategy::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for RecoveryStrategy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(RecoveryStrategy::Retry),
            "alternative" => Ok(RecoveryStrategy::Alternative),
            "skip" => Ok(RecoveryStrategy::Skip),
            other => Err(AgentError::UnknownRecoveryStrategy(other.to_string())),
        }
    }
}

/// 恢复计划：替换失败步骤的新步骤与所用策略
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub strategy: RecoveryStrategy,
    pub steps: Vec<Step>,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 按错误信息中的关键词分类
    pub fn classify(&self, step: &Step, message: &str) -> RecoveryStrategy {
        let msg = message.to_lowercase();
        if RETRY_PATTERNS.iter().any(|p| msg.contains(p)) {
            RecoveryStrategy::Retry
        } else if ALTERNATIVE_PATTERNS.iter().any(|p| msg.contains(p)) {
            RecoveryStrategy::Alternative
        } else if SKIP_PATTERNS.iter().any(|p| msg.contains(p)) {
            RecoveryStrategy::Skip
        } else if step.retry_count < PLAIN_RETRY_LIMIT {
            RecoveryStrategy::Retry
        } else {
            RecoveryStrategy::Alternative
        }
    }

    /// 生成恢复计划；步骤显式声明的策略优先，无法识别的策略名为致命错误
    pub fn handle(
        &self,
        failed: &Step,
        error: &AgentError,
        previous: &[ExecutionRecord],
    ) -> Result<RecoveryPlan, AgentError> {
        if error.is_fatal() {
            return Err(error.clone());
        }
        let strategy = match &failed.recovery {
            Some(name) => name.parse()?,
            None => self.classify(failed, &error.to_string()),
        };
        tracing::info!(step = %failed.id, %strategy, error = %error, "recovering step");

        let mut step = match strategy {
            RecoveryStrategy::Retry => {
                let mut s = failed.clone();
                s.id = format!("{}_retry", failed.id);
                s.retry_count += 1;
                s
            }
            RecoveryStrategy::Alternative => {
                let mut s = failed.clone();
                s.id = format!("{}_alt", failed.id);
                s.alternative = true;
                s.original_step = Some(
                    failed
                        .original_step
                        .clone()
                        .unwrap_or_else(|| failed.id.clone()),
                );
                s.description = format!("Alternative approach: {}", failed.description);
                s
            }
            RecoveryStrategy::Skip => {
                let mut s = Step::new(
                    format!("{}_skipped", failed.id),
                    "skip",
                    format!("Skipped: {}", failed.description),
                );
                s.dependencies = failed.dependencies.clone();
                s.original_step = Some(failed.id.clone());
                s.skipped = true;
                s
            }
        };
        step.metadata
            .insert("recovery_strategy".into(), Value::String(strategy.to_string()));
        step.metadata
            .insert("recovered_error".into(), Value::String(error.to_string()));
        step.metadata
            .insert("previous_results".into(), Value::from(previous.len()));

        Ok(RecoveryPlan {
            strategy,
            steps: vec![step],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> Step {
        Step::new("step_3", "read_file", "Read config")
    }

    fn strategy_for(msg: &str) -> RecoveryStrategy {
        RecoveryEngine::new()
            .handle(&failed(), &AgentError::ToolExecutionFailed(msg.to_string()), &[])
            .unwrap()
            .strategy
    }

    #[test]
    fn test_classification_by_error_code() {
        assert_eq!(strategy_for("connect ECONNREFUSED 127.0.0.1:80"), RecoveryStrategy::Retry);
        assert_eq!(strategy_for("ENOENT: no such file"), RecoveryStrategy::Alternative);
        assert_eq!(strategy_for("EACCES: permission denied"), RecoveryStrategy::Skip);
        assert_eq!(strategy_for("request timeout"), RecoveryStrategy::Retry);
    }

    #[test]
    fn test_timeout_error_variant_is_retry() {
        let plan = RecoveryEngine::new()
            .handle(&failed(), &AgentError::ToolTimeout("shell".into()), &[])
            .unwrap();
        assert_eq!(plan.strategy, RecoveryStrategy::Retry);
    }

    #[test]
    fn test_unclassified_falls_through_to_alternative() {
        let engine = RecoveryEngine::new();
        let mut step = failed();
        let err = AgentError::ToolExecutionFailed("weird".into());
        assert_eq!(engine.classify(&step, &err.to_string()), RecoveryStrategy::Retry);
        step.retry_count = 2;
        assert_eq!(engine.classify(&step, &err.to_string()), RecoveryStrategy::Alternative);
    }

    #[test]
    fn test_retry_step_shape() {
        let plan = RecoveryEngine::new()
            .handle(&failed(), &AgentError::ToolExecutionFailed("network down".into()), &[])
            .unwrap();
        let s = &plan.steps[0];
        assert_eq!(s.id, "step_3_retry");
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.action, "read_file");
    }

    #[test]
    fn test_alternative_and_skip_shape() {
        let engine = RecoveryEngine::new();
        let alt = engine
            .handle(&failed(), &AgentError::ToolExecutionFailed("not found".into()), &[])
            .unwrap();
        assert!(alt.steps[0].alternative);
        assert_eq!(alt.steps[0].original_step.as_deref(), Some("step_3"));
        assert_eq!(alt.steps[0].action, "read_file");
        assert_ne!(alt.steps[0].description, failed().description);

        let skip = engine
            .handle(&failed(), &AgentError::ToolExecutionFailed("permission denied".into()), &[])
            .unwrap();
        assert!(skip.steps[0].skipped);
        assert_eq!(skip.steps.len(), 1);
    }

    #[test]
    fn test_explicit_strategy_and_unknown_strategy() {
        let engine = RecoveryEngine::new();
        let mut step = failed();
        step.recovery = Some("skip".into());
        let plan = engine
            .handle(&step, &AgentError::ToolExecutionFailed("network".into()), &[])
            .unwrap();
        assert_eq!(plan.strategy, RecoveryStrategy::Skip);

        step.recovery = Some("pray".into());
        let err = engine
            .handle(&step, &AgentError::ToolExecutionFailed("x".into()), &[])
            .unwrap_err();
        assert_eq!(err, AgentError::UnknownRecoveryStrategy("pray".into()));
    }

    #[test]
    fn test_fatal_errors_are_not_recovered() {
        let err = RecoveryEngine::new()
            .handle(&failed(), &AgentError::MaxIterationsExceeded(3), &[])
            .unwrap_err();
        assert!(matches!(err, AgentError::MaxIterationsExceeded(3)));
    }
}
