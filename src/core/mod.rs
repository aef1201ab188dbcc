//! 核心层：错误与恢复、任务与内容键、生命周期事件

pub mod error;
pub mod events;
pub mod recovery;
pub mod task;

pub use error::AgentError;
pub use events::{EventBus, LifecycleEvent};
pub use recovery::{RecoveryEngine, RecoveryPlan, RecoveryStrategy};
pub use task::{Task, TaskDescription};
