//! 缓存镜像写入器
//!
//! 同步层每次状态变化都调用 [`CacheMirror::schedule`]，调用本身不等待 IO。
//! 后台任务按 key 只保留最新一份快照，窗口期结束后统一落盘，
//! 拖拽等高频操作因此不会每帧都写一次存储。

use crate::cache::SnapshotCache;
use crate::error::Result;
use crate::model::CacheSnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum MirrorCommand {
    Write {
        key: String,
        snapshot: CacheSnapshot,
    },
    Flush(oneshot::Sender<()>),
    Remove {
        key: String,
        done: oneshot::Sender<()>,
    },
}

struct MirrorInner {
    cache: Arc<dyn SnapshotCache>,
    tx: mpsc::UnboundedSender<MirrorCommand>,
    shutdown: CancellationToken,
}

impl Drop for MirrorInner {
    fn drop(&mut self) {
        // 后台任务收到信号后会先写完待写快照再退出
        self.shutdown.cancel();
    }
}

/// 后台合并写入的缓存镜像，克隆后共享同一个后台任务
#[derive(Clone)]
pub struct CacheMirror {
    inner: Arc<MirrorInner>,
}

impl CacheMirror {
    /// 启动后台写入任务，必须在 Tokio 运行时内调用
    pub fn spawn(cache: Arc<dyn SnapshotCache>, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(run_writer(cache.clone(), rx, window, shutdown.clone()));
        Self {
            inner: Arc::new(MirrorInner {
                cache,
                tx,
                shutdown,
            }),
        }
    }

    /// 登记一次写入，同一 key 的旧快照被覆盖
    pub fn schedule(&self, key: String, snapshot: CacheSnapshot) {
        if self
            .inner
            .tx
            .send(MirrorCommand::Write { key, snapshot })
            .is_err()
        {
            warn!("缓存写入任务已退出，丢弃快照");
        }
    }

    /// 立即写出所有待写快照并等待完成
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.tx.send(MirrorCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// 丢弃该 key 的待写快照并删除已落盘的数据
    pub async fn remove(&self, key: &str) {
        let (done, wait) = oneshot::channel();
        let command = MirrorCommand::Remove {
            key: key.to_string(),
            done,
        };
        if self.inner.tx.send(command).is_ok() {
            let _ = wait.await;
        }
    }

    /// 读取已落盘的快照（先写出待写内容，保证读到最新）
    pub async fn load(&self, key: &str) -> Result<Option<CacheSnapshot>> {
        self.flush().await;
        self.inner.cache.get(key).await
    }
}

async fn run_writer(
    cache: Arc<dyn SnapshotCache>,
    mut rx: mpsc::UnboundedReceiver<MirrorCommand>,
    window: Duration,
    shutdown: CancellationToken,
) {
    let mut pending: HashMap<String, CacheSnapshot> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let next = deadline;
        let timer = async move {
            match next {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                write_pending(cache.as_ref(), &mut pending).await;
                break;
            }
            _ = timer => {
                write_pending(cache.as_ref(), &mut pending).await;
                deadline = None;
            }
            command = rx.recv() => match command {
                None => {
                    write_pending(cache.as_ref(), &mut pending).await;
                    break;
                }
                Some(MirrorCommand::Write { key, snapshot }) => {
                    pending.insert(key, snapshot);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + window);
                    }
                }
                Some(MirrorCommand::Flush(done)) => {
                    write_pending(cache.as_ref(), &mut pending).await;
                    deadline = None;
                    let _ = done.send(());
                }
                Some(MirrorCommand::Remove { key, done }) => {
                    pending.remove(&key);
                    if pending.is_empty() {
                        deadline = None;
                    }
                    if let Err(e) = cache.remove(&key).await {
                        warn!(key = %key, "删除缓存失败: {e}");
                    }
                    let _ = done.send(());
                }
            }
        }
    }
    debug!("缓存写入任务退出");
}

async fn write_pending(cache: &dyn SnapshotCache, pending: &mut HashMap<String, CacheSnapshot>) {
    for (key, snapshot) in pending.drain() {
        match cache.put(&key, snapshot).await {
            Ok(()) => debug!(key = %key, "💾 缓存快照已写入"),
            Err(e) => warn!(key = %key, "缓存快照写入失败: {e}"),
        }
    }
}
