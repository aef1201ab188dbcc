//! Planner：任务 -> 依赖有序的步骤计划
//!
//! plan 按任务内容键缓存（命中时标记 from_cache）；replan 在步骤要求时重建剩余计划；
//! recover 交给 RecoveryEngine 按错误分类生成恢复步骤。

pub mod graph;
pub mod templates;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::core::{AgentError, RecoveryEngine, RecoveryPlan, Task};
use crate::tools::ExecutionRecord;

pub use graph::StepGraph;
pub use templates::{classify_complexity, classify_type};
pub use types::{Complexity, Plan, PlanMetadata, Step, TaskType};

/// 默认每步估算耗时（秒）
pub const DEFAULT_SECONDS_PER_STEP: u64 = 300;

/// 规划器：计划缓存为实例状态，多个 Planner 之间互不影响
pub struct Planner {
    cache: RwLock<HashMap<String, Plan>>,
    seconds_per_step: u64,
    recovery: RecoveryEngine,
}

impl Planner {
    pub fn new(seconds_per_step: u64) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            seconds_per_step,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn plan(&self, task: &Task) -> Result<Plan, AgentError> {
        self.plan_with_context(task, Map::new())
    }

    /// 规划并附带召回上下文；任务自身 context 在键冲突时优先
    pub fn plan_with_context(
        &self,
        task: &Task,
        recalled: Map<String, Value>,
    ) -> Result<Plan, AgentError> {
        let key = task.key();
        let mut context = recalled;
        for (k, v) in &task.context {
            context.insert(k.clone(), v.clone());
        }

        if let Some(cached) = self.cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            tracing::debug!(plan_id = %cached.id, "plan cache hit");
            return Ok(Plan {
                from_cache: true,
                context,
                ..cached
            });
        }

        let text = task.description.text();
        let complexity = classify_complexity(&text);
        let task_type = classify_type(&text);

        let steps = match task.description.explicit_steps() {
            // 显式步骤自带依赖时按原样保留（任意 DAG），否则串成线性链
            Some(raw) => {
                let steps = explicit_steps(raw)?;
                if steps.iter().any(|s| !s.dependencies.is_empty()) {
                    StepGraph::new(&steps)?.topological_order()?;
                    steps
                } else {
                    chain(steps)
                }
            }
            None => chain(
                templates::templates_for(task_type, complexity)
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| Step::new(format!("step_{}", i + 1), t.action, format!("{} {}", t.verb, text)))
                    .collect(),
            ),
        };

        let plan = Plan {
            id: format!("plan_{}", &key[..16]),
            task: task.clone(),
            estimated_duration_secs: steps.len() as u64 * self.seconds_per_step,
            created_at: chrono::Utc::now().timestamp_millis(),
            metadata: PlanMetadata {
                step_count: steps.len(),
                complexity,
                task_type,
                confidence: complexity.confidence(),
            },
            steps,
            from_cache: false,
            context,
        };

        tracing::info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            task_type = %task_type,
            "plan created"
        );
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, plan.clone());
        }
        Ok(plan)
    }

    /// 重新规划：去掉已有结果的步骤，前置恢复步骤，生成新 id（不进缓存）
    pub fn replan(&self, original: &Plan, current_results: &[ExecutionRecord], issue: &str) -> Plan {
        let done: HashSet<&str> = current_results.iter().map(|r| r.step.id.as_str()).collect();
        let id = format!(
            "{}_replan_{}",
            original.id,
            chrono::Utc::now().timestamp_millis()
        );

        let recovery: Vec<Step> = chain(
            templates::recovery_templates(issue)
                .into_iter()
                .enumerate()
                .map(|(i, (action, desc))| Step::new(format!("{}_recovery_{}", id, i + 1), action, desc))
                .collect(),
        );
        let last_recovery = recovery.last().map(|s| s.id.clone());

        let mut remaining: Vec<Step> = original
            .steps
            .iter()
            .filter(|s| !done.contains(s.id.as_str()))
            .cloned()
            .collect();
        let remaining_ids: HashSet<String> = remaining.iter().map(|s| s.id.clone()).collect();
        for step in &mut remaining {
            step.dependencies.retain(|d| remaining_ids.contains(d));
            if step.dependencies.is_empty() {
                if let Some(last) = &last_recovery {
                    step.dependencies.insert(last.clone());
                }
            }
        }

        let mut steps = recovery;
        steps.extend(remaining);
        tracing::info!(plan_id = %id, issue = %issue, steps = steps.len(), "replanned");

        Plan {
            id,
            task: original.task.clone(),
            estimated_duration_secs: steps.len() as u64 * self.seconds_per_step,
            created_at: chrono::Utc::now().timestamp_millis(),
            metadata: PlanMetadata {
                step_count: steps.len(),
                ..original.metadata.clone()
            },
            steps,
            from_cache: false,
            context: original.context.clone(),
        }
    }

    pub fn recover(
        &self,
        failed: &Step,
        error: &AgentError,
        previous_results: &[ExecutionRecord],
    ) -> Result<RecoveryPlan, AgentError> {
        self.recovery.handle(failed, error, previous_results)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn cached_plans(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(DEFAULT_SECONDS_PER_STEP)
    }
}

/// 步骤 i 仅依赖步骤 i-1
fn chain(mut steps: Vec<Step>) -> Vec<Step> {
    for i in 1..steps.len() {
        let prev = steps[i - 1].id.clone();
        steps[i].dependencies.clear();
        steps[i].dependencies.insert(prev);
    }
    if let Some(first) = steps.first_mut() {
        first.dependencies.clear();
    }
    steps
}

/// 解析结构化任务中的显式步骤；缺 id 时按序号补齐
fn explicit_steps(raw: &[Value]) -> Result<Vec<Step>, AgentError> {
    raw.iter()
        .enumerate()
        .map(|(i, v)| {
            let mut v = v.clone();
            let obj = v
                .as_object_mut()
                .ok_or_else(|| AgentError::InvalidPlan(format!("step {} is not an object", i + 1)))?;
            obj.entry("id").or_insert_with(|| Value::String(format!("step_{}", i + 1)));
            if !obj.contains_key("description") {
                let action = obj.get("action").and_then(Value::as_str).unwrap_or("").to_string();
                obj.insert("description".to_string(), Value::String(action));
            }
            serde_json::from_value(v).map_err(|e| AgentError::InvalidPlan(format!("step {}: {}", i + 1, e)))
        })
        .collect()
}
