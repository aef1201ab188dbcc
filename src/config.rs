//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RUNTIME__MAX_ITERATIONS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeSection,
    pub memory: MemorySection,
    pub planner: PlannerSection,
    pub tools: ToolsSection,
}

/// [runtime] 段：单个任务的迭代上限
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    50
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// [memory] 段：热缓存容量与持久化目录
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_hot_cache_size")]
    pub hot_cache_size: usize,
    #[serde(default = "default_memory_dir")]
    pub dir: PathBuf,
}

fn default_hot_cache_size() -> usize {
    100
}

fn default_memory_dir() -> PathBuf {
    PathBuf::from(".hive/memory")
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            hot_cache_size: default_hot_cache_size(),
            dir: default_memory_dir(),
        }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    /// 估算耗时用的每步固定秒数
    #[serde(default = "default_seconds_per_step")]
    pub seconds_per_step: u64,
}

fn default_seconds_per_step() -> u64 {
    300
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            seconds_per_step: default_seconds_per_step(),
        }
    }
}

/// [tools] 段：Shell 超时与输出上限、步骤截止时间、模拟路径延迟、文件工具根目录
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_shell_timeout_ms")]
    pub shell_timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// 任何工具单步执行的截止时间（秒），超时按 timeout 错误处理
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_simulated_delay_ms")]
    pub simulated_delay_ms: u64,
    pub workspace_root: Option<PathBuf>,
}

fn default_shell_timeout_ms() -> u64 {
    30_000
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_simulated_delay_ms() -> u64 {
    10
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            shell_timeout_ms: default_shell_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            step_timeout_secs: default_step_timeout_secs(),
            simulated_delay_ms: default_simulated_delay_ms(),
            workspace_root: None,
        }
    }
}

/// 加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| AgentError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.runtime.max_iterations, 50);
        assert_eq!(cfg.memory.hot_cache_size, 100);
        assert_eq!(cfg.planner.seconds_per_step, 300);
        assert_eq!(cfg.tools.shell_timeout_ms, 30_000);
        assert_eq!(cfg.tools.max_output_bytes, 1_048_576);
        assert!(cfg.tools.workspace_root.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hive.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[runtime]\nmax_iterations = 7\n\n[tools]\nshell_timeout_ms = 500").unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.runtime.max_iterations, 7);
        assert_eq!(cfg.tools.shell_timeout_ms, 500);
        assert_eq!(cfg.tools.max_output_bytes, 1_048_576);
        assert_eq!(cfg.memory.hot_cache_size, 100);
    }

    #[test]
    fn test_missing_explicit_file_is_config_error() {
        let err = load_config(Some(PathBuf::from("/nonexistent/hive.toml"))).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }
}
