//! 本地缓存快照
//!
//! 以 `cache_key → CacheSnapshot` 形式保存每个用户的记忆图谱镜像，
//! 启动时先读缓存让界面立即有数据，再由网络结果覆盖。
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`InMemoryCache`] | 进程内存，适合测试 |
//! | [`FileCache`] | JSON 文件持久化 |
//! | [`CacheMirror`] | 后台合并写入，同步层通过它镜像状态 |

pub mod file;
pub mod mirror;

pub use file::FileCache;
pub use mirror::CacheMirror;

use crate::error::Result;
use crate::model::CacheSnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 快照存储接口
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheSnapshot>>;

    /// 写入或覆盖
    async fn put(&self, key: &str, snapshot: CacheSnapshot) -> Result<()>;

    /// 删除，返回是否存在
    async fn remove(&self, key: &str) -> Result<bool>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// 进程内存缓存，不持久化
pub struct InMemoryCache {
    data: RwLock<HashMap<String, CacheSnapshot>>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SnapshotCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheSnapshot>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, snapshot: CacheSnapshot) -> Result<()> {
        self.data.write().await.insert(key.to_string(), snapshot);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.read().await.keys().cloned().collect())
    }
}
