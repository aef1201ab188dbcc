//! 生命周期事件：供日志、前端或测试订阅 Agent / Flow 的状态变化

use serde::Serialize;
use tokio::sync::mpsc;

use crate::agent::AgentStatus;

/// 单个生命周期事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Agent 状态迁移
    AgentStatus { agent_id: String, status: AgentStatus },
    StepCompleted {
        agent_id: String,
        step_id: String,
        duration_ms: u64,
    },
    StepFailed {
        agent_id: String,
        step_id: String,
        error: String,
    },
    /// 步骤结果要求重新规划
    Replanned {
        agent_id: String,
        plan_id: String,
        issue: String,
    },
    /// 失败步骤进入恢复
    Recovery {
        agent_id: String,
        step_id: String,
        strategy: String,
    },
    TaskCompleted {
        agent_id: String,
        duration_ms: u64,
        iterations: usize,
    },
    TaskFailed { agent_id: String, error: String },
    FlowStarted { flow_id: String, workflow: String },
    PhaseStarted {
        flow_id: String,
        phase: usize,
        parallel: bool,
    },
    AgentCompleted {
        flow_id: String,
        agent_id: String,
        success: bool,
    },
    PhaseCompleted { flow_id: String, phase: usize },
    /// 条件不满足，后续阶段不再执行
    FlowStopped { flow_id: String, phase: usize },
    FlowCompleted { flow_id: String, duration_ms: u64 },
    FlowFailed { flow_id: String, error: String },
}

/// 订阅者列表：每个 subscribe() 得到一个独立接收端；发送失败（接收端已丢弃）的订阅者被移除
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: std::sync::Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        rx
    }

    pub fn emit(&self, event: LifecycleEvent) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// 断开全部订阅者
    pub fn detach_all(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}
