//! 持久化后端
//!
//! MemoryBacking 是按字符串键寻址的 blob 存储：读（不存在返回 None）与写。
//! FileBacking 每个键一个 `<dir>/<key>.json` 文件，先写临时文件再 rename，避免写到一半留下损坏文件。

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;

#[async_trait]
pub trait MemoryBacking: Send + Sync {
    async fn read(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn write(&self, key: &str, blob: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileBacking {
    dir: PathBuf,
}

impl FileBacking {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl MemoryBacking for FileBacking {
    async fn read(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn write(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, blob)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("rename to {}", path.display()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let backing = FileBacking::new(dir.path());
        assert!(backing.read("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let backing = FileBacking::new(dir.path().join("nested"));
        backing.write("k", b"one").await.unwrap();
        backing.write("k", b"two").await.unwrap();
        assert_eq!(backing.read("k").await.unwrap().unwrap(), b"two");

        let names: Vec<String> = std::fs::read_dir(backing.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["k.json"]);
    }
}
