//! 步骤依赖图
//!
//! 使用邻接表和入度表对计划步骤做拓扑排序；同一批就绪步骤保持原计划中的相对顺序。

use std::collections::{HashMap, VecDeque};

use crate::core::AgentError;
use crate::planner::types::{Plan, Step};

/// 步骤依赖图
pub struct StepGraph {
    /// 邻接表：步骤下标 -> 依赖它的步骤下标
    pub adjacency: Vec<Vec<usize>>,
    /// 入度表：步骤下标 -> 未满足的依赖数
    pub in_degree: Vec<usize>,
}

impl StepGraph {
    /// 构建依赖图；依赖不存在的步骤 id 视为错误
    pub fn new(steps: &[Step]) -> Result<Self, AgentError> {
        let index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        if index.len() != steps.len() {
            return Err(AgentError::PlanCycle("duplicate step id".to_string()));
        }

        let mut adjacency = vec![Vec::new(); steps.len()];
        let mut in_degree = vec![0; steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.dependencies {
                let &d = index.get(dep.as_str()).ok_or_else(|| {
                    AgentError::PlanCycle(format!("step '{}' depends on unknown step '{}'", step.id, dep))
                })?;
                adjacency[d].push(i);
                in_degree[i] += 1;
            }
        }
        Ok(Self { adjacency, in_degree })
    }

    /// Kahn 拓扑排序，返回步骤下标序列；存在环时报错
    pub fn topological_order(&self) -> Result<Vec<usize>, AgentError> {
        let mut in_degree = self.in_degree.clone();
        let mut ready: VecDeque<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(i) = ready.pop_front() {
            order.push(i);
            let mut newly_ready = Vec::new();
            for &next in &self.adjacency[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    newly_ready.push(next);
                }
            }
            newly_ready.sort_unstable();
            ready.extend(newly_ready);
        }

        if order.len() != in_degree.len() {
            return Err(AgentError::PlanCycle("cyclic step dependencies".to_string()));
        }
        Ok(order)
    }
}

impl Plan {
    /// 按依赖关系排出可执行顺序（计划本身可以是任意 DAG）
    pub fn execution_order(&self) -> Result<Vec<Step>, AgentError> {
        let graph = StepGraph::new(&self.steps)?;
        Ok(graph
            .topological_order()?
            .into_iter()
            .map(|i| self.steps[i].clone())
            .collect())
    }
}
