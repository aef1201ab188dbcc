//! 工作流类型定义
//!
//! 工作流 = 有序阶段列表；每个阶段是一组 Agent 规格，并行或顺序执行，阶段结束后可用条件决定是否继续。
//! 条件有两种：结构化字段比较（可从 JSON / TOML 反序列化）与代码中的谓词函数。

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::{Task, TaskDescription};

pub type AgentId = String;

/// 工作流错误类型（构建与校验阶段）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow name must not be empty")]
    EmptyName,
    #[error("Workflow '{0}' has no phases")]
    NoPhases(String),
    #[error("Phase {0} has no agents")]
    EmptyPhase(usize),
    #[error("Phase {phase} declares agent '{agent}' more than once")]
    DuplicateAgent { phase: usize, agent: AgentId },
    /// 并行阶段内的 Agent 之间没有执行顺序，不能互相依赖
    #[error("Agent '{agent}' in parallel phase {phase} depends on sibling '{dependency}'")]
    IntraPhaseDependency {
        phase: usize,
        agent: AgentId,
        dependency: AgentId,
    },
    #[error("Invalid comparison operator: {0}")]
    InvalidOperator(String),
    #[error("Invalid workflow definition: {0}")]
    Parse(String),
}

/// 比较运算符；非法运算符在反序列化 / 构造时即报错
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    /// `==`：数字与数字字符串、布尔与 0/1 之间宽松比较
    Eq,
    /// `===`：类型必须相同
    StrictEq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::StrictEq => "===",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }

    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Eq => loose_eq(left, right),
            CompareOp::StrictEq => strict_eq(left, right),
            CompareOp::Ne => !loose_eq(left, right),
            CompareOp::Gt => ordering(left, right).map_or(false, |o| o.is_gt()),
            CompareOp::Lt => ordering(left, right).map_or(false, |o| o.is_lt()),
            CompareOp::Ge => ordering(left, right).map_or(false, |o| o.is_ge()),
            CompareOp::Le => ordering(left, right).map_or(false, |o| o.is_le()),
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "==" => Ok(CompareOp::Eq),
            "===" => Ok(CompareOp::StrictEq),
            "!=" => Ok(CompareOp::Ne),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            _ => Err(WorkflowError::InvalidOperator(value)),
        }
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if strict_eq(left, right) {
        return true;
    }
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => false,
        (Value::String(_), Value::String(_)) => false,
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn ordering(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Some(a.cmp(b));
    }
    as_number(left)?.partial_cmp(&as_number(right)?)
}

/// 结构化条件：取 agent 的结果中 field 字段与 value 比较
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub agent: AgentId,
    /// 点分路径；先在结果顶层查找，找不到再查结果的 output
    pub field: String,
    pub operator: CompareOp,
    pub value: Value,
}

impl FieldCondition {
    pub fn new(
        agent: impl Into<AgentId>,
        field: impl Into<String>,
        operator: &str,
        value: Value,
    ) -> Result<Self, WorkflowError> {
        Ok(Self {
            agent: agent.into(),
            field: field.into(),
            operator: CompareOp::try_from(operator.to_string())?,
            value,
        })
    }

    /// Agent 没有结果或字段不存在时为 false
    pub fn evaluate(&self, state: &FlowState) -> bool {
        let Some(result) = state.agent_results.get(&self.agent) else {
            return false;
        };
        let found = lookup(result, &self.field)
            .or_else(|| result.get("output").and_then(|out| lookup(out, &self.field)));
        match found {
            Some(actual) => self.operator.apply(actual, &self.value),
            None => false,
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| match current {
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            other => other.get(key),
        })
}

pub type FlowPredicate = Arc<dyn Fn(&FlowState) -> bool + Send + Sync>;

/// 阶段结束后的继续条件
#[derive(Clone)]
pub enum Condition {
    Field(FieldCondition),
    /// 以完整的 FlowState 调用；只能在代码中构造
    Predicate(FlowPredicate),
}

impl Condition {
    pub fn field(
        agent: impl Into<AgentId>,
        field: impl Into<String>,
        operator: &str,
        value: Value,
    ) -> Result<Self, WorkflowError> {
        FieldCondition::new(agent, field, operator, value).map(Condition::Field)
    }

    pub fn predicate(f: impl Fn(&FlowState) -> bool + Send + Sync + 'static) -> Self {
        Condition::Predicate(Arc::new(f))
    }

    pub fn evaluate(&self, state: &FlowState) -> bool {
        match self {
            Condition::Field(c) => c.evaluate(state),
            Condition::Predicate(f) => f(state),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Field(c) => f.debug_tuple("Field").field(c).finish(),
            Condition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        FieldCondition::deserialize(deserializer).map(Condition::Field)
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<AgentId>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(AgentId),
        Many(Vec<AgentId>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

/// 工作流中的单个 Agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSpec {
    /// 在 Orchestrator 内稳定的 id；重复出现时复用同一个 AgentRuntime
    pub id: AgentId,
    pub task: TaskDescription,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
    /// 单个 id 或 id 列表；已有结果的依赖以其 id 为键并入上下文
    #[serde(default, alias = "dependsOn", deserialize_with = "one_or_many")]
    pub depends_on: Vec<AgentId>,
}

impl AgentSpec {
    pub fn new(id: impl Into<AgentId>, task: impl Into<TaskDescription>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            context: Map::new(),
            constraints: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, id: impl Into<AgentId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// 组装提交给 AgentRuntime 的任务；缺失的依赖直接忽略
    pub fn to_task(&self, agent_results: &BTreeMap<AgentId, Value>) -> Task {
        let mut context = self.context.clone();
        for dep in &self.depends_on {
            if let Some(result) = agent_results.get(dep) {
                context.insert(dep.clone(), result.clone());
            }
        }
        Task {
            description: self.task.clone(),
            context,
            constraints: self.constraints.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Phase {
    #[serde(default)]
    pub name: Option<String>,
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl Phase {
    pub fn sequential(agents: Vec<AgentSpec>) -> Self {
        Self {
            name: None,
            agents,
            parallel: false,
            condition: None,
        }
    }

    pub fn parallel(agents: Vec<AgentSpec>) -> Self {
        Self {
            parallel: true,
            ..Self::sequential(agents)
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// 工作流定义
#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub phases: Vec<Phase>,
}

impl Workflow {
    /// 名称非空、至少一个阶段、每阶段至少一个 Agent 且 id 不重复、并行阶段内无相互依赖
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::EmptyName);
        }
        if self.phases.is_empty() {
            return Err(WorkflowError::NoPhases(self.name.clone()));
        }
        for (index, phase) in self.phases.iter().enumerate() {
            if phase.agents.is_empty() {
                return Err(WorkflowError::EmptyPhase(index));
            }
            let mut ids = HashSet::new();
            for agent in &phase.agents {
                if !ids.insert(agent.id.as_str()) {
                    return Err(WorkflowError::DuplicateAgent {
                        phase: index,
                        agent: agent.id.clone(),
                    });
                }
            }
            if phase.parallel {
                for agent in &phase.agents {
                    if let Some(dep) = agent.depends_on.iter().find(|d| ids.contains(d.as_str())) {
                        return Err(WorkflowError::IntraPhaseDependency {
                            phase: index,
                            agent: agent.id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn from_json(s: &str) -> Result<Self, WorkflowError> {
        let workflow: Workflow =
            serde_json::from_str(s).map_err(|e| WorkflowError::Parse(e.to_string()))?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn from_toml(s: &str) -> Result<Self, WorkflowError> {
        let workflow: Workflow = toml::from_str(s).map_err(|e| WorkflowError::Parse(e.to_string()))?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// 按扩展名选择格式：.toml 为 TOML，其余按 JSON
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::Parse(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Running,
    Completed,
    Error,
}

/// 单次 execute_workflow 的运行状态；结束后从活动注册表移除
#[derive(Debug, Clone, Serialize)]
pub struct FlowState {
    pub id: String,
    pub workflow: String,
    pub status: FlowStatus,
    /// 毫秒时间戳
    pub start_time: i64,
    pub agent_results: BTreeMap<AgentId, Value>,
    pub current_phase: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    pub success: bool,
    pub flow_id: String,
    /// 已完成 Agent 的结果（失败时为截至失败点的部分结果）
    pub results: BTreeMap<AgentId, Value>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 条件不满足而停止时，所在阶段序号
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at_phase: Option<usize>,
}
