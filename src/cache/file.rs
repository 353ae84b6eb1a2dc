//! 基于 JSON 文件的快照缓存
//!
//! 存储格式（每个 key 为缓存键）：
//! ```json
//! {
//!   "memolink_data_42": { "version": 1, "memories": [...], "connections": [...], "darkMode": false }
//! }
//! ```

use crate::cache::SnapshotCache;
use crate::error::{CacheError, Result};
use crate::model::CacheSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// JSON 文件缓存
///
/// 写时立即落盘，读时直接返回内存中的副本。
pub struct FileCache {
    path: PathBuf,
    data: RwLock<HashMap<String, CacheSnapshot>>,
}

impl FileCache {
    /// 打开或创建缓存文件，自动建父目录；文件损坏时从空状态开始
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::IoError(format!("创建目录失败: {e}")))?;
        }
        let data: HashMap<String, CacheSnapshot> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| CacheError::IoError(format!("读取缓存文件失败: {e}")))?;
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("缓存文件解析失败，从空状态开始: {e}");
                HashMap::new()
            })
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), users = data.len(), "🗄️ FileCache 初始化");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self) -> Result<()> {
        let data = self.data.read().await;
        let json = serde_json::to_string(&*data)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| CacheError::IoError(format!("写入缓存文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 缓存已持久化");
        Ok(())
    }
}

#[async_trait]
impl SnapshotCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<CacheSnapshot>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, snapshot: CacheSnapshot) -> Result<()> {
        self.data.write().await.insert(key.to_string(), snapshot);
        self.flush().await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let found = self.data.write().await.remove(key).is_some();
        if found {
            self.flush().await?;
        }
        Ok(found)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.read().await.keys().cloned().collect())
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(&s[2..]);
    }
    path.to_path_buf()
}
