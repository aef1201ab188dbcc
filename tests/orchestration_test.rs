//! 编排引擎集成测试：只通过公开 API 驱动 Agent 与工作流

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive::agent::{AgentComponents, AgentRuntime};
use hive::config::{AppConfig, ToolsSection};
use hive::core::{AgentError, RecoveryStrategy, Task, TaskDescription};
use hive::flow::{AgentSpec, Condition, FlowOrchestrator, Workflow, WorkflowBuilder};
use hive::memory::MemoryStore;
use hive::planner::{Complexity, Planner, Step, TaskType};
use hive::tools::{Executor, StepOutput, Tool, ToolRegistry};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// 返回 params.reply；params.fail 存在时以其内容失败
struct Reply;

#[async_trait]
impl Tool for Reply {
    fn name(&self) -> &str {
        "reply"
    }

    fn description(&self) -> &str {
        "echo params.reply"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        if let Some(msg) = step.param_str("fail") {
            return Err(AgentError::ToolExecutionFailed(msg.to_string()));
        }
        Ok(StepOutput::ok(step.params.get("reply").cloned().unwrap_or(Value::Null)))
    }
}

fn components(dir: &TempDir) -> AgentComponents {
    let mut registry = ToolRegistry::with_defaults(&ToolsSection::default());
    registry.register(Reply);
    AgentComponents::new(
        Arc::new(MemoryStore::with_dir(dir.path().join("memory"), 100)),
        Arc::new(Planner::default()),
        Arc::new(Executor::new(
            Arc::new(registry),
            Duration::from_secs(10),
            Duration::from_millis(1),
        )),
    )
}

fn reply(id: &str, value: Value) -> AgentSpec {
    AgentSpec::new(
        id,
        TaskDescription::Structured(json!({
            "title": format!("{} work", id),
            "steps": [{"action": "reply", "params": {"reply": value}}]
        })),
    )
}

fn failing(id: &str) -> AgentSpec {
    AgentSpec::new(
        id,
        TaskDescription::Structured(json!({
            "title": format!("{} work", id),
            "steps": [{"action": "reply", "params": {"fail": "invalid input"}, "allow_recovery": false}]
        })),
    )
}

#[tokio::test]
async fn test_login_feature_scenario() {
    let dir = TempDir::new().unwrap();
    let components = components(&dir);
    let task = Task::new("implement user login feature");

    let plan = components.planner.plan(&task).unwrap();
    assert_eq!(plan.metadata.task_type, TaskType::Feature);
    assert_eq!(plan.metadata.complexity, Complexity::Medium);
    let actions: Vec<&str> = plan.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["analyze_code", "design", "generate_code", "run_tests", "integrate", "verify"]
    );

    let agent = AgentRuntime::new("solo", components, 50);
    let result = agent.execute(task, &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.results.len(), 6);
    let ids: Vec<&str> = result.results.iter().map(|r| r.step.id.as_str()).collect();
    let planned: Vec<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, planned);
}

#[tokio::test]
async fn test_plan_determinism() {
    let planner = Planner::default();
    let task = Task::new("refactor the payment module");
    let first = planner.plan(&task).unwrap();
    let second = planner.plan(&Task::new("refactor the payment module")).unwrap();
    assert_eq!(first.id, second.id);
    assert!(second.from_cache);
}

#[tokio::test]
async fn test_iteration_cap_never_exceeded() {
    let dir = TempDir::new().unwrap();
    let agent = AgentRuntime::new("capped", components(&dir), 4);
    let result = agent
        .execute(Task::new("implement user login feature"), &CancellationToken::new())
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Max iterations exceeded"));
    assert_eq!(result.iterations, 4);
}

#[tokio::test]
async fn test_recovery_classification() {
    let planner = Planner::default();
    let step = Step::new("step_1", "shell", "deploy");
    let strategy = |msg: &str| {
        planner
            .recover(&step, &AgentError::ToolExecutionFailed(msg.into()), &[])
            .unwrap()
            .strategy
    };
    assert_eq!(strategy("connect ECONNREFUSED"), RecoveryStrategy::Retry);
    assert_eq!(strategy("ENOENT: no such file"), RecoveryStrategy::Alternative);
    assert_eq!(strategy("EACCES: denied"), RecoveryStrategy::Skip);
}

#[tokio::test]
async fn test_memory_store_is_last_write_wins() {
    let dir = TempDir::new().unwrap();
    let components = components(&dir);
    let agent = AgentRuntime::new("twice", components.clone(), 50);
    let task = Task::new("write api docs");
    let token = CancellationToken::new();

    agent.execute(task.clone(), &token).await;
    let result = agent.execute(task.clone(), &token).await;
    let entry = components.memory.recall(&task).await.unwrap();
    assert_eq!(entry.metadata.result_count, result.results.len());
    assert!(entry.metadata.success);
}

#[tokio::test]
async fn test_two_phase_depends_on() {
    let dir = TempDir::new().unwrap();
    let orch = FlowOrchestrator::new(components(&dir), 50);
    let workflow = WorkflowBuilder::new("design-then-build")
        .sequential(vec![reply("a1", json!({"tables": ["users", "sessions"]}))])
        .sequential(vec![reply("a2", json!("built")).depends_on("a1")])
        .build()
        .unwrap();

    let result = orch.execute_workflow(&workflow, &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    let task = orch.agent("a2").unwrap().state().current_task.unwrap();
    assert_eq!(task.context["a1"]["output"]["tables"][0], "users");
    assert_eq!(task.context["a1"]["success"], true);
}

#[tokio::test]
async fn test_sequential_phase_passes_results_forward() {
    let dir = TempDir::new().unwrap();
    let orch = FlowOrchestrator::new(components(&dir), 50);
    let workflow = WorkflowBuilder::new("one-phase-chain")
        .sequential(vec![
            reply("a", json!({"v": 1})),
            reply("b", json!("second")).depends_on("a"),
            reply("c", json!("third")).depends_on("a").depends_on("b"),
        ])
        .build()
        .unwrap();

    let result = orch.execute_workflow(&workflow, &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    let b = orch.agent("b").unwrap().state().current_task.unwrap();
    assert_eq!(b.context["a"]["output"]["v"], 1);
    let c = orch.agent("c").unwrap().state().current_task.unwrap();
    assert_eq!(c.context["a"]["output"]["v"], 1);
    assert_eq!(c.context["b"]["output"], "second");
}

#[tokio::test]
async fn test_parallel_join_reports_failure() {
    let dir = TempDir::new().unwrap();
    let orch = FlowOrchestrator::new(components(&dir), 50);
    let workflow = WorkflowBuilder::new("review")
        .parallel(vec![reply("lint", json!("clean")), failing("test"), reply("audit", json!("ok"))])
        .build()
        .unwrap();

    let result = orch.execute_workflow(&workflow, &CancellationToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.results.len(), 3);
    assert!(result.error.unwrap().contains("test"));
}

#[tokio::test]
async fn test_condition_gates_next_phase() {
    let dir = TempDir::new().unwrap();
    let orch = FlowOrchestrator::new(components(&dir), 50);
    let workflow = WorkflowBuilder::new("gated")
        .sequential(vec![reply("a1", json!({"status": "skip"}))])
        .when(Condition::field("a1", "status", "==", json!("continue")).unwrap())
        .sequential(vec![reply("a2", json!("ran"))])
        .build()
        .unwrap();

    let result = orch.execute_workflow(&workflow, &CancellationToken::new()).await;
    assert!(result.success);
    assert!(!result.results.contains_key("a2"));
    assert!(orch.agent("a2").is_none());
}

#[tokio::test]
async fn test_predicate_condition_sees_flow_state() {
    let dir = TempDir::new().unwrap();
    let orch = FlowOrchestrator::new(components(&dir), 50);
    let workflow = WorkflowBuilder::new("predicate")
        .parallel(vec![reply("x", json!(1)), reply("y", json!(2))])
        .when(Condition::predicate(|state| {
            state.agent_results.values().all(|r| r["success"] == true)
        }))
        .sequential(vec![reply("z", json!(3))])
        .build()
        .unwrap();

    let result = orch.execute_workflow(&workflow, &CancellationToken::new()).await;
    assert!(result.success);
    assert_eq!(result.results["z"]["output"], 3);
}

#[cfg(unix)]
#[tokio::test]
async fn test_workflow_file_with_shell_and_file_tools() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();

    let mut cfg = AppConfig::default();
    cfg.memory.dir = dir.path().join("memory");
    cfg.tools.workspace_root = Some(workspace.clone());
    cfg.tools.simulated_delay_ms = 1;

    let toml = r#"
        name = "write-and-check"

        [[phases]]
        [[phases.agents]]
        id = "writer"

        [phases.agents.task]
        title = "write notes"

        [[phases.agents.task.steps]]
        action = "write_file"
        params = { path = "notes/todo.txt", content = "ship it" }

        [[phases.agents.task.steps]]
        action = "shell"
        params = { command = "cat notes/todo.txt" }

        [phases.condition]
        agent = "writer"
        field = "stdout"
        operator = "=="
        value = "ship it"

        [[phases]]
        [[phases.agents]]
        id = "checker"
        depends_on = "writer"

        [phases.agents.task]
        title = "check notes"

        [[phases.agents.task.steps]]
        action = "check_file"
        params = { path = "notes/todo.txt" }
    "#;
    let path = dir.path().join("flow.toml");
    std::fs::write(&path, toml).unwrap();

    let workflow = Workflow::from_file(&path).unwrap();
    let orch = FlowOrchestrator::from_config(&cfg);
    let result = orch.execute_workflow(&workflow, &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.results["checker"]["output"]["exists"], true);
    assert!(workspace.join("notes/todo.txt").exists());
    orch.shutdown().await;
}
