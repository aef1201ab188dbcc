//! 工作流编排器
//!
//! 按阶段顺序执行工作流：并行阶段同时派发所有 Agent 并等待全部结束（一个失败不取消其它已派发的 Agent，
//! 但整个阶段与工作流失败）；顺序阶段按数组顺序逐个执行，每个 Agent 都能通过 depends_on 看到之前所有 Agent 的结果。
//! 同一 id 的 Agent 在 Orchestrator 生命周期内复用同一个 AgentRuntime。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentComponents, AgentRuntime};
use crate::config::AppConfig;
use crate::core::{AgentError, EventBus, LifecycleEvent};
use crate::flow::types::*;

pub struct FlowOrchestrator {
    components: AgentComponents,
    max_iterations: usize,
    agents: Mutex<HashMap<AgentId, Arc<AgentRuntime>>>,
    /// 进行中的工作流；结束（成功或失败）即移除
    flows: Mutex<HashMap<String, FlowState>>,
    events: EventBus,
    cancel: CancellationToken,
}

/// 单个 Agent 的执行结果（已转为 JSON）
struct AgentOutcome {
    id: AgentId,
    success: bool,
    value: Value,
    error: Option<String>,
}

impl FlowOrchestrator {
    pub fn new(components: AgentComponents, max_iterations: usize) -> Self {
        Self {
            components,
            max_iterations,
            agents: Mutex::new(HashMap::new()),
            flows: Mutex::new(HashMap::new()),
            events: EventBus::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(AgentComponents::from_config(cfg), cfg.runtime.max_iterations)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn agent_count(&self) -> usize {
        lock(&self.agents).len()
    }

    pub fn agent(&self, id: &str) -> Option<Arc<AgentRuntime>> {
        lock(&self.agents).get(id).cloned()
    }

    pub fn active_flows(&self) -> Vec<FlowState> {
        lock(&self.flows).values().cloned().collect()
    }

    /// 执行工作流；从不返回 Err，失败时带上截至失败点的部分结果
    pub async fn execute_workflow(&self, workflow: &Workflow, cancel: &CancellationToken) -> FlowResult {
        let start = Instant::now();
        let flow_id = format!(
            "flow_{}_{}_{}",
            workflow.name.replace(char::is_whitespace, "_"),
            chrono::Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        if self.cancel.is_cancelled() {
            return failure(flow_id, BTreeMap::new(), 0, AgentError::ShutDown.to_string());
        }
        if let Err(e) = workflow.validate() {
            return failure(flow_id, BTreeMap::new(), 0, e.to_string());
        }

        // 关闭 Orchestrator 或调用方取消都会取消本次工作流
        let flow_token = self.cancel.child_token();
        let link = {
            let caller = cancel.clone();
            let token = flow_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        };

        let mut state = FlowState {
            id: flow_id.clone(),
            workflow: workflow.name.clone(),
            status: FlowStatus::Running,
            start_time: chrono::Utc::now().timestamp_millis(),
            agent_results: BTreeMap::new(),
            current_phase: 0,
        };
        self.track(&state);
        self.events.emit(LifecycleEvent::FlowStarted {
            flow_id: flow_id.clone(),
            workflow: workflow.name.clone(),
        });
        tracing::info!(flow = %flow_id, phases = workflow.phases.len(), "flow started");

        let mut stopped_at_phase = None;
        let mut outcome = Ok(());
        for (index, phase) in workflow.phases.iter().enumerate() {
            state.current_phase = index;
            self.track(&state);
            self.events.emit(LifecycleEvent::PhaseStarted {
                flow_id: flow_id.clone(),
                phase: index,
                parallel: phase.parallel,
            });
            tracing::info!(flow = %flow_id, phase = index, parallel = phase.parallel, "phase started");

            outcome = if phase.parallel {
                self.run_parallel(phase, &mut state, &flow_token).await
            } else {
                self.run_sequential(phase, &mut state, &flow_token).await
            };
            if outcome.is_err() {
                break;
            }
            self.events.emit(LifecycleEvent::PhaseCompleted {
                flow_id: flow_id.clone(),
                phase: index,
            });

            if let Some(condition) = &phase.condition {
                if !condition.evaluate(&state) {
                    tracing::info!(flow = %flow_id, phase = index, "condition not met, stopping flow");
                    self.events.emit(LifecycleEvent::FlowStopped {
                        flow_id: flow_id.clone(),
                        phase: index,
                    });
                    stopped_at_phase = Some(index);
                    break;
                }
            }
        }

        link.abort();
        self.untrack(&flow_id);
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                state.status = FlowStatus::Completed;
                self.events.emit(LifecycleEvent::FlowCompleted {
                    flow_id: flow_id.clone(),
                    duration_ms,
                });
                tracing::info!(flow = %flow_id, duration_ms, "flow completed");
                FlowResult {
                    success: true,
                    flow_id,
                    results: state.agent_results,
                    duration_ms,
                    error: None,
                    stopped_at_phase,
                }
            }
            Err(error) => {
                state.status = FlowStatus::Error;
                self.events.emit(LifecycleEvent::FlowFailed {
                    flow_id: flow_id.clone(),
                    error: error.clone(),
                });
                tracing::warn!(flow = %flow_id, error = %error, "flow failed");
                failure(flow_id, state.agent_results, duration_ms, error)
            }
        }
    }

    async fn run_sequential(
        &self,
        phase: &Phase,
        state: &mut FlowState,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        for spec in &phase.agents {
            let outcome = self.run_agent(spec, state, cancel).await;
            state.agent_results.insert(outcome.id.clone(), outcome.value);
            self.track(state);
            if !outcome.success {
                return Err(agent_failure(&outcome.id, outcome.error.as_deref()));
            }
        }
        Ok(())
    }

    /// 全部派发并等待全部结束；所有结果（含失败）都记入 agent_results
    async fn run_parallel(
        &self,
        phase: &Phase,
        state: &mut FlowState,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let outcomes = {
            let snapshot: &FlowState = state;
            join_all(
                phase
                    .agents
                    .iter()
                    .map(|spec| self.run_agent(spec, snapshot, cancel)),
            )
            .await
        };

        let mut failures = Vec::new();
        for outcome in outcomes {
            if !outcome.success {
                failures.push(agent_failure(&outcome.id, outcome.error.as_deref()));
            }
            state.agent_results.insert(outcome.id, outcome.value);
        }
        self.track(state);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    async fn run_agent(&self, spec: &AgentSpec, state: &FlowState, cancel: &CancellationToken) -> AgentOutcome {
        let Some(agent) = self.get_or_create(&spec.id) else {
            let error = AgentError::ShutDown.to_string();
            return AgentOutcome {
                id: spec.id.clone(),
                success: false,
                value: json!({ "success": false, "error": error }),
                error: Some(error),
            };
        };
        let task = spec.to_task(&state.agent_results);
        let result = agent.execute(task, cancel).await;

        self.events.emit(LifecycleEvent::AgentCompleted {
            flow_id: state.id.clone(),
            agent_id: spec.id.clone(),
            success: result.success,
        });
        let value = serde_json::to_value(&result)
            .unwrap_or_else(|_| json!({ "success": result.success, "error": result.error }));
        AgentOutcome {
            id: spec.id.clone(),
            success: result.success,
            error: result.error,
            value,
        }
    }

    /// shutdown 先取消再清空注册表；取消后不再创建新 Agent
    fn get_or_create(&self, id: &str) -> Option<Arc<AgentRuntime>> {
        let mut agents = lock(&self.agents);
        if self.cancel.is_cancelled() {
            tracing::debug!(agent = %id, "orchestrator shut down, agent not created");
            return None;
        }
        let agent = agents.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!(agent = %id, "creating agent runtime");
            Arc::new(AgentRuntime::new(id, self.components.clone(), self.max_iterations))
        });
        Some(agent.clone())
    }

    fn track(&self, state: &FlowState) {
        lock(&self.flows).insert(state.id.clone(), state.clone());
    }

    fn untrack(&self, flow_id: &str) {
        lock(&self.flows).remove(flow_id);
    }

    /// 取消进行中的工作流，并发关闭所有 Agent，清空注册表并断开订阅者
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let agents: Vec<Arc<AgentRuntime>> = lock(&self.agents).drain().map(|(_, a)| a).collect();
        tracing::info!(agents = agents.len(), "orchestrator shutting down");
        join_all(agents.iter().map(|a| a.shutdown())).await;
        lock(&self.flows).clear();
        self.events.detach_all();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn agent_failure(id: &str, error: Option<&str>) -> String {
    format!("Agent '{}' failed: {}", id, error.unwrap_or("unknown error"))
}

fn failure(flow_id: String, results: BTreeMap<AgentId, Value>, duration_ms: u64, error: String) -> FlowResult {
    FlowResult {
        success: false,
        flow_id,
        results,
        duration_ms,
        error: Some(error),
        stopped_at_phase: None,
    }
}
