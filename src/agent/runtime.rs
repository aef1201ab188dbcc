//! AgentRuntime：单个 Agent 的任务生命周期状态机
//!
//! execute 永不返回 Err：任何阶段的错误都转为 success = false 的 TaskResult。
//! 步骤循环以当前计划的剩余步骤为队列；重新规划替换整个队列，恢复步骤替换失败步骤本身。
//! 迭代计数在整个任务内累计，达到 max_iterations 后再取下一步即为致命错误。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentComponents, AgentRuntimeState, AgentStatus, TaskResult};
use crate::core::{AgentError, EventBus, LifecycleEvent, Task};
use crate::planner::{Plan, Step};
use crate::tools::{ExecutionRecord, StepOutput};

pub const DEFAULT_MAX_ITERATIONS: usize = 50;

pub struct AgentRuntime {
    id: String,
    components: AgentComponents,
    max_iterations: usize,
    state: Mutex<AgentRuntimeState>,
    events: EventBus,
    /// 同一 Agent 的 execute / reset / shutdown 串行
    run_lock: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
}

impl AgentRuntime {
    pub fn new(id: impl Into<String>, components: AgentComponents, max_iterations: usize) -> Self {
        Self {
            id: id.into(),
            components,
            max_iterations,
            state: Mutex::new(AgentRuntimeState::default()),
            events: EventBus::new(),
            run_lock: tokio::sync::Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> AgentRuntimeState {
        self.lock_state().clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.lock_state().status
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub async fn execute(&self, task: Task, cancel: &CancellationToken) -> TaskResult {
        if self.is_shut_down() {
            return failed_result(AgentError::ShutDown, Vec::new(), 0, 0, None);
        }
        let _guard = self.run_lock.lock().await;
        if self.is_shut_down() {
            return failed_result(AgentError::ShutDown, Vec::new(), 0, 0, None);
        }

        let start = Instant::now();
        {
            let mut state = self.lock_state();
            *state = AgentRuntimeState {
                status: AgentStatus::Planning,
                current_task: Some(task.clone()),
                iteration: 0,
                start_time: Some(chrono::Utc::now().timestamp_millis()),
                results: Vec::new(),
            };
        }
        self.emit_status(AgentStatus::Planning);
        tracing::info!(agent = %self.id, task = %task.description.text(), "task started");

        let mut plan_id = None;
        let outcome = self.run(&task, cancel, &mut plan_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let (results, iterations) = {
            let state = self.lock_state();
            (state.results.clone(), state.iteration)
        };

        match outcome {
            Ok(()) => {
                self.set_status(AgentStatus::Completed);
                self.events.emit(LifecycleEvent::TaskCompleted {
                    agent_id: self.id.clone(),
                    duration_ms,
                    iterations,
                });
                tracing::info!(agent = %self.id, duration_ms, iterations, "task completed");
                TaskResult {
                    success: true,
                    output: last_output(&results),
                    results,
                    duration_ms,
                    error: None,
                    iterations,
                    plan_id,
                }
            }
            Err(e) => {
                self.set_status(AgentStatus::Error);
                self.events.emit(LifecycleEvent::TaskFailed {
                    agent_id: self.id.clone(),
                    error: e.to_string(),
                });
                tracing::warn!(agent = %self.id, error = %e, iterations, "task failed");
                failed_result(e, results, duration_ms, iterations, plan_id)
            }
        }
    }

    async fn run(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        plan_id: &mut Option<String>,
    ) -> Result<(), AgentError> {
        let recalled = self.recall_context(task).await;
        let mut plan = self.components.planner.plan_with_context(task, recalled)?;
        *plan_id = Some(plan.id.clone());
        let mut pending: VecDeque<Step> = plan.execution_order()?.into();

        self.set_status(AgentStatus::Executing);

        while let Some(step) = pending.pop_front() {
            self.next_iteration()?;
            let started = Instant::now();
            let outcome = self.components.executor.execute(&step, cancel).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(out) if out.success => {
                    let issue = out.needs_replanning.clone();
                    self.lock_state()
                        .results
                        .push(ExecutionRecord::success(step.clone(), out, duration_ms));
                    self.events.emit(LifecycleEvent::StepCompleted {
                        agent_id: self.id.clone(),
                        step_id: step.id.clone(),
                        duration_ms,
                    });
                    if let Some(issue) = issue {
                        plan = self.replan(&plan, &mut pending, &issue)?;
                        *plan_id = Some(plan.id.clone());
                    }
                    continue;
                }
                Ok(out) => AgentError::ToolExecutionFailed(soft_failure_message(&out)),
                Err(e) => e,
            };

            self.events.emit(LifecycleEvent::StepFailed {
                agent_id: self.id.clone(),
                step_id: step.id.clone(),
                error: failure.to_string(),
            });
            if failure.is_fatal() {
                return Err(failure);
            }
            if !step.allow_recovery {
                return Err(AgentError::RecoveryDisallowed {
                    step: step.id.clone(),
                    reason: failure.to_string(),
                });
            }

            let previous = self.lock_state().results.clone();
            let recovery = self.components.planner.recover(&step, &failure, &previous)?;
            self.events.emit(LifecycleEvent::Recovery {
                agent_id: self.id.clone(),
                step_id: step.id.clone(),
                strategy: recovery.strategy.to_string(),
            });

            // 后续步骤对失败步骤的依赖改指向最后一个恢复步骤
            if let Some(last) = recovery.steps.last().map(|s| s.id.clone()) {
                for s in pending.iter_mut() {
                    if s.dependencies.remove(&step.id) {
                        s.dependencies.insert(last.clone());
                    }
                }
            }
            for s in recovery.steps.into_iter().rev() {
                pending.push_front(s);
            }
        }

        let results = self.lock_state().results.clone();
        self.components.memory.store(task, &plan, &results).await;
        Ok(())
    }

    /// 以「已完成步骤 + 剩余队列」为当前计划交给 Planner 重新规划，返回新计划并替换队列
    fn replan(
        &self,
        plan: &Plan,
        pending: &mut VecDeque<Step>,
        issue: &str,
    ) -> Result<Plan, AgentError> {
        let done = self.lock_state().results.clone();
        let current = Plan {
            steps: done
                .iter()
                .map(|r| r.step.clone())
                .chain(pending.drain(..))
                .collect(),
            ..plan.clone()
        };
        let replanned = self.components.planner.replan(&current, &done, issue);
        *pending = replanned.execution_order()?.into();
        self.events.emit(LifecycleEvent::Replanned {
            agent_id: self.id.clone(),
            plan_id: replanned.id.clone(),
            issue: issue.to_string(),
        });
        Ok(replanned)
    }

    /// 召回结果以 "memory" 键并入规划上下文；未命中也照常规划
    async fn recall_context(&self, task: &Task) -> Map<String, Value> {
        let memory = match self.components.memory.recall(task).await {
            Some(entry) => json!({
                "found": true,
                "timestamp": entry.timestamp,
                "success": entry.metadata.success,
                "result_count": entry.metadata.result_count,
                "plan_id": entry.plan.id,
            }),
            None => json!({ "found": false }),
        };
        let mut context = Map::new();
        context.insert("memory".to_string(), memory);
        context
    }

    fn next_iteration(&self) -> Result<usize, AgentError> {
        let mut state = self.lock_state();
        if state.iteration >= self.max_iterations {
            return Err(AgentError::MaxIterationsExceeded(self.max_iterations));
        }
        state.iteration += 1;
        Ok(state.iteration)
    }

    /// 回到 idle；共享的 Memory / Planner 缓存不受影响。关闭后不可再用
    pub async fn reset(&self) -> Result<(), AgentError> {
        let _guard = self.run_lock.lock().await;
        if self.is_shut_down() {
            return Err(AgentError::ShutDown);
        }
        *self.lock_state() = AgentRuntimeState::default();
        self.emit_status(AgentStatus::Idle);
        Ok(())
    }

    /// 终态：刷写记忆并断开全部订阅者
    pub async fn shutdown(&self) {
        let _guard = self.run_lock.lock().await;
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.components.memory.flush().await;
        self.events.detach_all();
        tracing::info!(agent = %self.id, "agent shut down");
    }

    fn set_status(&self, status: AgentStatus) {
        self.lock_state().status = status;
        self.emit_status(status);
    }

    fn emit_status(&self, status: AgentStatus) {
        self.events.emit(LifecycleEvent::AgentStatus {
            agent_id: self.id.clone(),
            status,
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, AgentRuntimeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn failed_result(
    error: AgentError,
    results: Vec<ExecutionRecord>,
    duration_ms: u64,
    iterations: usize,
    plan_id: Option<String>,
) -> TaskResult {
    TaskResult {
        success: false,
        output: last_output(&results),
        results,
        duration_ms,
        error: Some(error.to_string()),
        iterations,
        plan_id,
    }
}

fn last_output(results: &[ExecutionRecord]) -> Value {
    results
        .last()
        .and_then(|r| r.result.as_ref())
        .map(|out| out.output.clone())
        .unwrap_or(Value::Null)
}

/// 软失败（如 shell 非零退出）的错误描述，优先取 error，其次 stderr
fn soft_failure_message(out: &StepOutput) -> String {
    ["error", "stderr"]
        .iter()
        .filter_map(|k| out.output.get(*k).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| out.output.to_string())
}
