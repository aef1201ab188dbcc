//! 工作流构建器
//!
//! 提供流畅的API来构建工作流，build 时统一校验

use crate::flow::types::*;

pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    phases: Vec<Phase>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            phases: Vec::new(),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// 追加一个已构造的阶段
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// 追加顺序阶段
    pub fn sequential(self, agents: Vec<AgentSpec>) -> Self {
        self.phase(Phase::sequential(agents))
    }

    /// 追加并行阶段
    pub fn parallel(self, agents: Vec<AgentSpec>) -> Self {
        self.phase(Phase::parallel(agents))
    }

    /// 为最后一个阶段设置继续条件；尚无阶段时忽略
    pub fn when(mut self, condition: Condition) -> Self {
        if let Some(last) = self.phases.last_mut() {
            last.condition = Some(condition);
        }
        self
    }

    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let workflow = Workflow {
            name: self.name,
            description: self.description,
            phases: self.phases,
        };
        workflow.validate()?;
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_two_phase_workflow() {
        let workflow = WorkflowBuilder::new("Feature Delivery")
            .description("design then implement")
            .sequential(vec![AgentSpec::new("architect", "design the login feature")])
            .when(Condition::field("architect", "success", "==", json!(true)).unwrap())
            .parallel(vec![
                AgentSpec::new("backend", "implement login api").depends_on("architect"),
                AgentSpec::new("frontend", "implement login form").depends_on("architect"),
            ])
            .build()
            .expect("Failed to build workflow");

        assert_eq!(workflow.name, "Feature Delivery");
        assert_eq!(workflow.phases.len(), 2);
        assert!(workflow.phases[0].condition.is_some());
        assert!(workflow.phases[1].parallel);
    }

    #[test]
    fn test_build_without_phases_fails() {
        let result = WorkflowBuilder::new("Empty").build();
        assert_eq!(result.unwrap_err(), WorkflowError::NoPhases("Empty".into()));
    }

    #[test]
    fn test_build_without_name_fails() {
        let result = WorkflowBuilder::new("  ")
            .sequential(vec![AgentSpec::new("a", "x")])
            .build();
        assert_eq!(result.unwrap_err(), WorkflowError::EmptyName);
    }

    #[test]
    fn test_duplicate_agent_in_phase_fails() {
        let result = WorkflowBuilder::new("Dup")
            .parallel(vec![AgentSpec::new("a", "x"), AgentSpec::new("a", "y")])
            .build();
        assert!(matches!(result, Err(WorkflowError::DuplicateAgent { phase: 0, .. })));
    }

    #[test]
    fn test_sequential_phase_may_depend_on_earlier_sibling() {
        let result = WorkflowBuilder::new("Chain")
            .sequential(vec![
                AgentSpec::new("a", "x"),
                AgentSpec::new("b", "y").depends_on("a"),
            ])
            .build();
        assert!(result.is_ok());
    }
}
