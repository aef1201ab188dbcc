//! Hive - 命令行入口
//!
//! `hive task "<描述>"` 跑单个 Agent 并输出 TaskResult JSON；
//! `hive run <工作流文件>` 跑 JSON / TOML 工作流并输出 FlowResult JSON。
//! Ctrl+C 取消正在执行的任务或工作流。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hive::agent::{AgentComponents, AgentRuntime};
use hive::config::load_config;
use hive::core::{Task, TaskDescription};
use hive::flow::{FlowOrchestrator, Workflow};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "hive", version, about = "Agent task orchestration engine")]
struct Cli {
    /// 配置文件（叠加在 config/default.toml 之上）
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and execute a single task.
    Task {
        /// Task description; a JSON object is taken as a structured task.
        description: String,
        /// Context entries as key=value (value parsed as JSON when possible).
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
    },
    /// Execute a workflow file (.json or .toml).
    Run {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load config")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Task {
            description,
            context,
        } => {
            let mut task = Task::new(parse_description(description));
            for entry in context {
                let (key, value) = entry
                    .split_once('=')
                    .with_context(|| format!("Invalid context entry '{}', expected KEY=VALUE", entry))?;
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
                task = task.with_context(key, value);
            }

            let agent = AgentRuntime::new(
                "cli",
                AgentComponents::from_config(&cfg),
                cfg.runtime.max_iterations,
            );
            let result = agent.execute(task, &cancel).await;
            agent.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Run { file } => {
            let workflow = Workflow::from_file(&file)
                .with_context(|| format!("Failed to load workflow {}", file.display()))?;
            let orchestrator = FlowOrchestrator::from_config(&cfg);
            let result = orchestrator.execute_workflow(&workflow, &cancel).await;
            orchestrator.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// 以 `{` 开头且是合法 JSON 的描述按结构化任务处理
fn parse_description(raw: String) -> TaskDescription {
    if raw.trim_start().starts_with('{') {
        if let Ok(value) = serde_json::from_str(&raw) {
            return TaskDescription::Structured(value);
        }
    }
    TaskDescription::Text(raw)
}
