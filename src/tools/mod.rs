pub mod executor;
pub mod filesystem;
pub mod placeholder;
pub mod registry;
pub mod shell;

pub use executor::{resolve_action, ExecutionRecord, Executor, ExecutorStats};
pub use filesystem::{FileExistsTool, FileReadTool, FileWriteTool, Workspace};
pub use placeholder::{AnalyzeCodeTool, GenerateCodeTool};
pub use registry::{StepOutput, Tool, ToolRegistry};
pub use shell::ShellTool;
