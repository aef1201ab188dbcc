//! 记忆层：按任务内容键缓存历史执行结果
//!
//! - **HotCache**: 进程内有界缓存，按插入顺序淘汰
//! - **MemoryBacking**: 持久化后端（默认 FileBacking，每键一个 JSON 文件），持久条目不会被淘汰
//!
//! recall 先查热缓存，再查持久层并回填热缓存；I/O 失败只记 warn 并按未命中处理，从不中断任务。

pub mod backing;
pub mod cache;

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::Task;
use crate::planner::Plan;
use crate::tools::ExecutionRecord;

pub use backing::{FileBacking, MemoryBacking};
pub use cache::HotCache;

pub const DEFAULT_HOT_CACHE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub result_count: usize,
    /// 全部结果成功
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub task: Task,
    pub plan: Plan,
    pub results: Vec<ExecutionRecord>,
    /// 毫秒时间戳
    pub timestamp: i64,
    pub metadata: MemoryMetadata,
}

pub struct MemoryStore {
    hot: Mutex<HotCache<MemoryEntry>>,
    backing: Arc<dyn MemoryBacking>,
}

impl MemoryStore {
    pub fn new(backing: Arc<dyn MemoryBacking>, hot_cache_size: usize) -> Self {
        Self {
            hot: Mutex::new(HotCache::new(hot_cache_size)),
            backing,
        }
    }

    /// 以目录为持久层
    pub fn with_dir(dir: impl AsRef<Path>, hot_cache_size: usize) -> Self {
        Self::new(Arc::new(FileBacking::new(dir)), hot_cache_size)
    }

    /// None 表示未命中（包括持久层读失败或内容损坏）
    pub async fn recall(&self, task: &Task) -> Option<MemoryEntry> {
        let key = task.key();
        if let Some(entry) = self.hot_get(&key) {
            tracing::debug!(key = %key, "memory hot hit");
            return Some(entry);
        }

        let bytes = match self.backing.read(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key = %key, "memory miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "memory read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice::<MemoryEntry>(&bytes) {
            Ok(entry) => {
                self.hot_insert(key, entry.clone());
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "memory entry unreadable, treating as miss");
                None
            }
        }
    }

    /// 同步写热缓存，再写持久层（调用方 await）；持久层失败只记 warn，条目仍保留在热缓存
    pub async fn store(&self, task: &Task, plan: &Plan, results: &[ExecutionRecord]) -> MemoryEntry {
        let key = task.key();
        let entry = MemoryEntry {
            task: task.clone(),
            plan: plan.clone(),
            results: results.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: MemoryMetadata {
                result_count: results.len(),
                success: results.iter().all(|r| r.success),
            },
        };
        self.hot_insert(key.clone(), entry.clone());
        self.persist(&key, &entry).await;
        entry
    }

    /// 将整个热缓存写入持久层（关闭时调用）
    pub async fn flush(&self) {
        let snapshot = match self.hot.lock() {
            Ok(hot) => hot.snapshot(),
            Err(_) => return,
        };
        tracing::info!(entries = snapshot.len(), "memory flush");
        for (key, entry) in snapshot {
            self.persist(&key, &entry).await;
        }
    }

    pub fn hot_len(&self) -> usize {
        self.hot.lock().map(|h| h.len()).unwrap_or(0)
    }

    async fn persist(&self, key: &str, entry: &MemoryEntry) {
        let blob = match serde_json::to_vec_pretty(entry) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "memory entry not serializable");
                return;
            }
        };
        if let Err(e) = self.backing.write(key, &blob).await {
            tracing::warn!(key = %key, error = %e, "memory write failed, kept in hot cache only");
        }
    }

    fn hot_get(&self, key: &str) -> Option<MemoryEntry> {
        self.hot.lock().ok().and_then(|hot| hot.get(key))
    }

    fn hot_insert(&self, key: String, entry: MemoryEntry) {
        if let Ok(mut hot) = self.hot.lock() {
            hot.insert(key, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Planner, Step};
    use crate::tools::StepOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct Broken;

    #[async_trait]
    impl MemoryBacking for Broken {
        async fn read(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            anyhow::bail!("disk on fire")
        }

        async fn write(&self, _key: &str, _blob: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    fn record(ok: bool) -> ExecutionRecord {
        let step = Step::new("s", "design", "d");
        if ok {
            ExecutionRecord::success(step, StepOutput::ok(json!("done")), 1)
        } else {
            ExecutionRecord::failure(step, &crate::core::AgentError::ToolExecutionFailed("x".into()), 1)
        }
    }

    #[tokio::test]
    async fn test_store_then_recall_from_disk_in_fresh_store() {
        let dir = TempDir::new().unwrap();
        let task = Task::new("write docs");
        let plan = Planner::default().plan(&task).unwrap();

        let store = MemoryStore::with_dir(dir.path(), 10);
        assert!(store.recall(&task).await.is_none());
        store.store(&task, &plan, &[record(true), record(false)]).await;

        let fresh = MemoryStore::with_dir(dir.path(), 10);
        assert_eq!(fresh.hot_len(), 0);
        let entry = fresh.recall(&task).await.unwrap();
        assert_eq!(entry.metadata.result_count, 2);
        assert!(!entry.metadata.success);
        assert_eq!(fresh.hot_len(), 1);
    }

    #[tokio::test]
    async fn test_store_twice_is_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let task = Task::new("write docs");
        let plan = Planner::default().plan(&task).unwrap();
        let store = MemoryStore::with_dir(dir.path(), 10);

        store.store(&task, &plan, &[record(true), record(true)]).await;
        store.store(&task, &plan, &[record(true), record(true)]).await;
        let entry = store.recall(&task).await.unwrap();
        assert_eq!(entry.metadata.result_count, 2);
        assert!(entry.metadata.success);
    }

    #[tokio::test]
    async fn test_io_failures_degrade_to_miss_and_hot_cache() {
        let store = MemoryStore::new(Arc::new(Broken), 10);
        let task = Task::new("anything");
        assert!(store.recall(&task).await.is_none());

        let plan = Planner::default().plan(&task).unwrap();
        store.store(&task, &plan, &[record(true)]).await;
        assert!(store.recall(&task).await.is_some());
    }

    #[tokio::test]
    async fn test_flush_persists_hot_entries() {
        let dir = TempDir::new().unwrap();
        let task = Task::new("flush me");
        let plan = Planner::default().plan(&task).unwrap();
        let store = MemoryStore::new(Arc::new(FileBacking::new(dir.path())), 10);
        store.store(&task, &plan, &[]).await;
        std::fs::remove_file(dir.path().join(format!("{}.json", task.key()))).unwrap();

        store.flush().await;
        assert!(dir.path().join(format!("{}.json", task.key())).exists());
    }
}
