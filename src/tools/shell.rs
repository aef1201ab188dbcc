//! Shell 工具：带硬超时与输出上限的命令执行
//!
//! 命令取自 step.params.command，通过 sh -c / cmd /C 执行；禁止 rm -rf、mkfs 等危险子串。
//! 与其它工具不同，命令失败（非零退出、超时、输出超限、无法启动）不抛错，而是返回带 stdout/stderr 的软失败结果。
//! stdout/stderr 边读边缓冲，各自最多保留 max_output_bytes；超时或超限时杀掉子进程并返回已采集的部分输出。

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::core::AgentError;
use crate::planner::Step;
use crate::tools::{StepOutput, Tool, Workspace};

/// 禁止的命令/子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "curl | sh",
    "chmod 777 /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

pub struct ShellTool {
    timeout_ms: u64,
    max_output_bytes: usize,
    workspace: Workspace,
}

impl ShellTool {
    pub fn new(timeout_ms: u64, max_output_bytes: usize, workspace: Workspace) -> Self {
        Self {
            timeout_ms,
            max_output_bytes,
            workspace,
        }
    }

    fn check_forbidden(&self, raw: &str) -> Result<(), AgentError> {
        let lower = raw.to_lowercase();
        match FORBIDDEN_SUBSTR.iter().find(|p| lower.contains(*p)) {
            Some(p) => Err(AgentError::ToolExecutionFailed(format!(
                "permission denied: forbidden pattern '{}'",
                p
            ))),
            None => Ok(()),
        }
    }
}

/// 子进程输出采集结果；缓冲区归工具所有，超时后仍保留已读到的部分
#[derive(Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).to_string()
    }
}

/// 读到 EOF 或达到上限；超过上限的部分丢弃并返回 true
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, buf: &mut Vec<u8>, cap: usize) -> std::io::Result<bool> {
    let Some(mut reader) = reader else {
        return Ok(false);
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        let room = cap.saturating_sub(buf.len());
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok(true);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// 并发读取 stdout/stderr；任一路超出上限即杀掉子进程，不再继续缓冲
async fn collect(child: &mut Child, captured: &mut Captured, cap: usize) -> std::io::Result<ExitStatus> {
    let Captured {
        stdout,
        stderr,
        truncated,
    } = captured;
    {
        let out = read_capped(child.stdout.take(), stdout, cap);
        let err = read_capped(child.stderr.take(), stderr, cap);
        tokio::pin!(out, err);
        let (mut out_done, mut err_done) = (false, false);
        while !(out_done && err_done) {
            tokio::select! {
                r = &mut out, if !out_done => {
                    out_done = true;
                    *truncated |= r?;
                }
                r = &mut err, if !err_done => {
                    err_done = true;
                    *truncated |= r?;
                }
            }
            if *truncated {
                break;
            }
        }
    }
    if *truncated {
        // 已退出的进程 start_kill 会报错，忽略即可
        let _ = child.start_kill();
    }
    child.wait().await
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command. Params: {\"command\": \"...\", \"cwd\": \"optional dir\"}"
    }

    async fn execute(&self, step: &Step) -> Result<StepOutput, AgentError> {
        let command = step
            .param_str("command")
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AgentError::MissingField {
                step: step.id.clone(),
                action: step.action.clone(),
                field: "command",
            })?;
        self.check_forbidden(command)?;

        tracing::info!(command = %command, step = %step.id, "shell tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(cwd) = step.param_str("cwd") {
            cmd.current_dir(self.workspace.resolve(cwd)?);
        } else if let Some(root) = self.workspace.root() {
            cmd.current_dir(root);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(StepOutput::failed(json!({
                    "command": command,
                    "error": format!("Execution failed: {}", e),
                    "stdout": "",
                    "stderr": "",
                })))
            }
        };

        let mut captured = Captured::default();
        let waited = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            collect(&mut child, &mut captured, self.max_output_bytes),
        )
        .await;

        let status = match waited {
            Err(_) => {
                tracing::warn!(command = %command, timeout_ms = self.timeout_ms, "shell command timed out, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(StepOutput::failed(json!({
                    "command": command,
                    "error": format!("Command timed out after {}ms", self.timeout_ms),
                    "stdout": Captured::text(&captured.stdout),
                    "stderr": Captured::text(&captured.stderr),
                    "truncated": captured.truncated,
                })));
            }
            Ok(Err(e)) => {
                return Ok(StepOutput::failed(json!({
                    "command": command,
                    "error": format!("Execution failed: {}", e),
                    "stdout": Captured::text(&captured.stdout),
                    "stderr": Captured::text(&captured.stderr),
                })))
            }
            Ok(Ok(status)) => status,
        };

        let mut body = json!({
            "command": command,
            "exit_code": status.code(),
            "stdout": Captured::text(&captured.stdout),
            "stderr": Captured::text(&captured.stderr),
            "truncated": captured.truncated,
        });
        if captured.truncated {
            tracing::warn!(command = %command, max_output_bytes = self.max_output_bytes, "shell output exceeded cap, killed");
            body["error"] = json!(format!("Output exceeded {} bytes", self.max_output_bytes));
            return Ok(StepOutput::failed(body));
        }
        if status.success() {
            Ok(StepOutput::ok(body))
        } else {
            tracing::warn!(command = %command, code = ?status.code(), "shell command failed");
            Ok(StepOutput::failed(body))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new(30_000, 1024 * 1024, Workspace::default())
    }

    fn step(command: &str) -> Step {
        Step::new("s1", "shell", "run").with_param("command", json!(command))
    }

    #[tokio::test]
    async fn test_successful_command() {
        let out = tool().execute(&step("echo hello")).await.unwrap();
        assert!(out.success);
        assert_eq!(out.output["stdout"].as_str().unwrap().trim(), "hello");
        assert_eq!(out.output["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_failure_is_returned_not_thrown() {
        let out = tool()
            .execute(&step("echo partial; echo oops 1>&2; exit 3"))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.output["exit_code"], 3);
        assert!(out.output["stdout"].as_str().unwrap().contains("partial"));
        assert!(out.output["stderr"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_is_soft_failure() {
        let tool = ShellTool::new(100, 1024, Workspace::default());
        let out = tool.execute(&step("sleep 5")).await.unwrap();
        assert!(!out.success);
        assert!(out.output["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let tool = ShellTool::new(300, 1024, Workspace::default());
        let out = tool
            .execute(&step("echo partial; echo warn 1>&2; sleep 5"))
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.output["error"].as_str().unwrap().contains("timed out"));
        assert!(out.output["stdout"].as_str().unwrap().contains("partial"));
        assert!(out.output["stderr"].as_str().unwrap().contains("warn"));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let tool = ShellTool::new(30_000, 8, Workspace::default());
        let out = tool.execute(&step("echo 0123456789abcdef")).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.output["stdout"].as_str().unwrap(), "01234567");
        assert_eq!(out.output["truncated"], true);
        assert!(out.output["error"].as_str().unwrap().contains("exceeded 8 bytes"));
    }

    #[tokio::test]
    async fn test_endless_output_stops_child_at_cap() {
        let tool = ShellTool::new(20_000, 64 * 1024, Workspace::default());
        let started = std::time::Instant::now();
        let out = tool.execute(&step("yes")).await.unwrap();
        // 未被杀掉的 yes 会一直写到 20s 超时
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!out.success);
        assert_eq!(out.output["truncated"], true);
        assert_eq!(out.output["stdout"].as_str().unwrap().len(), 64 * 1024);
        assert!(out.output["exit_code"].is_null());
    }

    #[tokio::test]
    async fn test_output_exactly_at_cap_is_not_truncated() {
        let tool = ShellTool::new(30_000, 6, Workspace::default());
        let out = tool.execute(&step("printf abcdef")).await.unwrap();
        assert!(out.success);
        assert_eq!(out.output["stdout"], "abcdef");
        assert_eq!(out.output["truncated"], false);
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let err = tool()
            .execute(&Step::new("s1", "shell", "run"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MissingField { field: "command", .. }));
    }

    #[tokio::test]
    async fn test_forbidden_pattern() {
        let err = tool().execute(&step("mkfs.ext4 /dev/null")).await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}
