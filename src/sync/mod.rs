//! 乐观同步层
//!
//! [`MemorySync`] 持有记忆图谱的权威内存副本，对外提供增删改、移动、连接等操作：
//!
//! 1. 先在本地集合上生效（新建条目使用 `temp-` 临时 id）
//! 2. 再调用 [`RemoteGateway`]，成功后用服务端返回值替换乐观值
//! 3. 失败时回滚到调用前的状态并把错误返回给调用方
//!
//! 位置移动（拖拽）是例外：本地立即生效、远端请求后台执行，失败只记日志不回滚，
//! 同一记忆上的新移动会取消旧的在途请求。
//!
//! 每次状态变化后通过 [`CacheMirror`] 把快照镜像到 `memolink_data_<user_id>`；
//! 未登录时为离线模式，所有操作只作用于本地集合。

mod inflight;
pub mod query;
mod state;

use crate::cache::{CacheMirror, InMemoryCache, SnapshotCache};
use crate::config::{ClientConfig, DEFAULT_MEMORY_LIMIT, PAGE_SIZE};
use crate::error::{Result, SyncError};
use crate::gateway::RemoteGateway;
use crate::model::{
    CacheSnapshot, Connection, EntityId, Memory, MemoryDraft, MemoryPatch, Position,
    SNAPSHOT_VERSION, UserProfile,
};
use crate::session::{CACHE_KEY_PREFIX, Session, SessionHandle, cache_key_for};
use inflight::InflightRegistry;
use query::{AlbumQuery, Neighbors};
use state::GraphState;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 缓存镜像的默认合并窗口
pub const DEFAULT_CACHE_WINDOW: Duration = Duration::from_millis(250);

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct MemorySyncBuilder {
    gateway: Arc<dyn RemoteGateway>,
    session: SessionHandle,
    cache: Option<Arc<dyn SnapshotCache>>,
    cache_window: Duration,
    page_size: usize,
    memory_limit: usize,
}

impl MemorySyncBuilder {
    /// 快照存储，默认为进程内存
    pub fn cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_window(mut self, window: Duration) -> Self {
        self.cache_window = window;
        self
    }

    /// 从客户端配置读取分页大小、合并窗口与默认条数上限
    pub fn config(mut self, config: &ClientConfig) -> Self {
        self.page_size = config.page_size;
        self.cache_window = Duration::from_millis(config.cache_debounce_ms);
        self.memory_limit = config.default_memory_limit;
        self
    }

    /// 构建同步层，必须在 Tokio 运行时内调用
    pub fn build(self) -> MemorySync {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()));
        let mirror = CacheMirror::spawn(cache, self.cache_window);
        let state = Arc::new(RwLock::new(GraphState::default()));
        let inflight = Arc::new(InflightRegistry::new());
        let watcher = watch_session(&self.session, state.clone(), mirror.clone(), inflight.clone());

        MemorySync {
            gateway: self.gateway,
            session: self.session,
            mirror,
            state,
            inflight,
            page_size: self.page_size,
            memory_limit: self.memory_limit,
            watcher,
        }
    }
}

/// 会话结束或切换用户时清空内存状态并删除上一位用户的缓存
fn watch_session(
    session: &SessionHandle,
    state: Arc<RwLock<GraphState>>,
    mirror: CacheMirror,
    inflight: Arc<InflightRegistry>,
) -> JoinHandle<()> {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        let mut current = rx.borrow_and_update().clone();
        while rx.changed().await.is_ok() {
            let next = rx.borrow_and_update().clone();
            if next == current {
                continue;
            }
            if let Some(previous) = &current {
                inflight.cancel_all();
                write_state(&state).clear();
                if next.is_none() {
                    mirror.remove(&cache_key_for(previous)).await;
                }
                info!(previous = %previous, next = ?next, "🧹 会话变化，已清空本地图谱");
            }
            current = next;
        }
    })
}

fn read_state(state: &RwLock<GraphState>) -> RwLockReadGuard<'_, GraphState> {
    state.read().unwrap_or_else(|e| e.into_inner())
}

fn write_state(state: &RwLock<GraphState>) -> RwLockWriteGuard<'_, GraphState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}

// ── MemorySync ───────────────────────────────────────────────────────────────

/// 记忆图谱的客户端同步层
pub struct MemorySync {
    gateway: Arc<dyn RemoteGateway>,
    session: SessionHandle,
    mirror: CacheMirror,
    state: Arc<RwLock<GraphState>>,
    inflight: Arc<InflightRegistry>,
    page_size: usize,
    memory_limit: usize,
    watcher: JoinHandle<()>,
}

impl Drop for MemorySync {
    fn drop(&mut self) {
        self.watcher.abort();
        self.inflight.cancel_all();
    }
}

impl MemorySync {
    pub fn builder(gateway: Arc<dyn RemoteGateway>, session: SessionHandle) -> MemorySyncBuilder {
        MemorySyncBuilder {
            gateway,
            session,
            cache: None,
            cache_window: DEFAULT_CACHE_WINDOW,
            page_size: PAGE_SIZE,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn is_online(&self) -> bool {
        self.session.is_active()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        read_state(&self.state)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        write_state(&self.state)
    }

    /// 登录状态下把当前快照交给后台镜像
    fn mirror(&self, state: &GraphState) {
        if let Some(key) = self.session.cache_key() {
            self.mirror.schedule(key, state.snapshot());
        }
    }

    // ── 读取 ──

    pub fn memories(&self) -> Vec<Memory> {
        self.read().memories.clone()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.read().connections.clone()
    }

    pub fn memory(&self, id: &str) -> Option<Memory> {
        self.read().memory(id).cloned()
    }

    /// 无缓存数据且首次加载未完成
    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    pub fn has_more(&self) -> bool {
        self.read().has_more
    }

    /// 服务端报告的记忆总数，尚未加载时为 `None`
    pub fn total_count(&self) -> Option<usize> {
        self.read().total_count
    }

    pub fn dark_mode(&self) -> bool {
        self.read().dark_mode
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.read().snapshot()
    }

    pub fn album(&self, album_query: &AlbumQuery) -> Vec<Memory> {
        query::album(&self.read().memories, album_query)
    }

    pub fn recent(&self, n: usize) -> Vec<Memory> {
        query::recent(&self.read().memories, n)
    }

    pub fn all_tags(&self) -> BTreeSet<String> {
        query::all_tags(&self.read().memories)
    }

    pub fn neighbors(&self, id: &str) -> Neighbors {
        let state = self.read();
        query::neighbors(&state.memories, &state.connections, id)
    }

    // ── 启动 ──

    /// 用当前用户的缓存快照预填充，返回恢复的记忆条数
    ///
    /// 已完成过远端加载、未登录或没有缓存时不做任何事。
    pub async fn restore_cached(&self) -> Result<usize> {
        let Some(key) = self.session.cache_key() else {
            return Ok(0);
        };
        let Some(snapshot) = self.mirror.load(&key).await? else {
            return Ok(0);
        };
        if snapshot.version > SNAPSHOT_VERSION {
            warn!(key = %key, version = snapshot.version, "⚠️ 缓存版本高于当前客户端，忽略");
            return Ok(0);
        }
        let restored = {
            let mut state = self.write();
            if state.loaded {
                return Ok(0);
            }
            state.restore(snapshot)
        };
        info!(key = %key, restored, "📦 已从缓存恢复");
        Ok(restored)
    }

    /// 启动流程：先读缓存，再拉取用户资料与首页
    pub async fn bootstrap(&self) -> Result<()> {
        if let Err(e) = self.restore_cached().await {
            warn!("⚠️ 读取缓存失败，直接从远端加载: {e}");
        }
        if self.is_online()
            && self.session.profile().is_none()
            && let Err(e) = self.load_profile().await
        {
            warn!("⚠️ 拉取用户资料失败，按默认上限 {} 条限制: {e}", self.memory_limit);
        }
        self.refresh(false).await
    }

    // ── 记忆 ──

    /// 新建记忆
    ///
    /// 在线时先以临时 id 插入，服务端确认后替换为正式 id；失败时移除临时条目。
    /// 非会员的条数上限取自用户资料，尚未拉取到资料时按默认上限计。
    ///
    /// 若临时条目在服务端确认前已被 [`delete`](Self::delete)，仍返回服务端分配的条目，
    /// 但它已补发远端删除，本地与服务端都不再存在。
    pub async fn create(&self, draft: MemoryDraft) -> Result<Memory> {
        if !self.is_online() {
            let memory = draft.into_memory(EntityId::local());
            let mut state = self.write();
            state.touch(memory.id.as_str());
            state.memories.push(memory.clone());
            debug!(memory_id = %memory.id, "📝 离线新建记忆");
            return Ok(memory);
        }

        let quota = match self.session.profile() {
            Some(profile) => profile.quota(),
            None => Some(self.memory_limit),
        };
        let temp_id = EntityId::temporary();
        {
            let mut state = self.write();
            if let Some(limit) = quota
                && state.memories.len() >= limit
            {
                return Err(SyncError::QuotaExceeded { limit }.into());
            }
            state.touch(temp_id.as_str());
            state.memories.push(draft.clone().into_memory(temp_id.clone()));
            self.mirror(&state);
        }
        debug!(temp_id = %temp_id, title = %draft.title, "📝 乐观插入记忆");

        match self.gateway.create_memory(&draft).await {
            Ok(server) => Ok(self.commit_memory(&temp_id, server).await),
            Err(e) => {
                {
                    let mut state = self.write();
                    if let Some(index) = state.memory_index(temp_id.as_str()) {
                        state.memories.remove(index);
                    }
                    state.touch(temp_id.as_str());
                    self.mirror(&state);
                }
                self.inflight.exhume(temp_id.as_str());
                warn!(temp_id = %temp_id, "↩️ 新建记忆失败，已回滚: {e}");
                Err(e)
            }
        }
    }

    /// 服务端确认新建后把临时条目替换为正式条目
    async fn commit_memory(&self, temp_id: &EntityId, server: Memory) -> Memory {
        let server_id = server.id.as_str().to_string();

        if self.inflight.exhume(temp_id.as_str()) {
            info!(temp_id = %temp_id, server_id = %server_id, "🪦 新建回包前已被删除，补发远端删除，返回的条目已不存在");
            if let Err(e) = self.gateway.delete_memory(&server_id).await {
                warn!(server_id = %server_id, "⚠️ 补发删除失败: {e}");
            }
            return server;
        }

        let (committed, deferred_move) = {
            let mut state = self.write();
            let Some(index) = state.memory_index(temp_id.as_str()) else {
                // 会话已结束或集合被清空
                return server;
            };
            if state.memory_index(&server_id).is_some() {
                // 刷新已先一步带回该条
                state.memories.remove(index);
                state.rename(temp_id.as_str(), &server_id);
                state.bump();
                self.mirror(&state);
                return server;
            }

            let local_position = state.memories[index].position;
            let mut committed = server.clone();
            committed.id = temp_id.clone().commit(server_id.clone());
            let deferred_move = match local_position {
                Some(position) if server.position != local_position => {
                    committed.position = Some(position);
                    Some(position)
                }
                _ => None,
            };
            state.memories[index] = committed.clone();
            state.rename(temp_id.as_str(), &server_id);
            state.bump();
            self.mirror(&state);
            (committed, deferred_move)
        };

        info!(temp_id = %temp_id, server_id = %server_id, "✅ 记忆已提交");
        if let Some(position) = deferred_move {
            debug!(memory_id = %server_id, "📍 补发临时阶段的位置变化");
            self.spawn_remote_move(&server_id, position);
        }
        committed
    }

    /// 修改记忆
    ///
    /// 成功后以服务端返回值为准；若回包到达前该记忆又被改动，则保留本地较新的值。
    pub async fn update(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let online = self.is_online();
        let (before_all, before_item, generation, optimistic) = {
            let mut state = self.write();
            let index = state
                .memory_index(id)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            if online && state.memories[index].id.is_pending() {
                return Err(SyncError::Pending(id.to_string()).into());
            }
            let before_all = state.memories.clone();
            let before_item = state.memories[index].clone();
            patch.apply_to(&mut state.memories[index]);
            let generation = state.touch(id);
            let optimistic = state.memories[index].clone();
            self.mirror(&state);
            (before_all, before_item, generation, optimistic)
        };
        if !online {
            return Ok(optimistic);
        }
        if patch.position.is_some() {
            self.inflight.cancel(id);
        }

        match self.gateway.update_memory(id, &patch).await {
            Ok(server) => {
                let mut state = self.write();
                if state.generation(id) != generation {
                    debug!(memory_id = %id, "⏭️ 更新回包已过期，保留本地较新的值");
                } else if let Some(index) = state.memory_index(id) {
                    state.memories[index] = server.clone();
                    state.bump();
                    self.mirror(&state);
                }
                Ok(server)
            }
            Err(e) => {
                {
                    let mut state = self.write();
                    if state.revision() == generation {
                        // 期间没有其他变化，整体还原
                        state.memories = before_all;
                    } else if state.generation(id) == generation
                        && let Some(index) = state.memory_index(id)
                    {
                        state.memories[index] = before_item;
                    }
                    state.touch(id);
                    self.mirror(&state);
                }
                warn!(memory_id = %id, "↩️ 更新记忆失败，已回滚: {e}");
                Err(e)
            }
        }
    }

    /// 删除记忆，并级联删除所有引用它的连接
    pub async fn delete(&self, id: &str) -> Result<()> {
        let online = self.is_online();
        let (before, removed, generation) = {
            let mut state = self.write();
            if state.memory_index(id).is_none() {
                return Err(SyncError::NotFound(id.to_string()).into());
            }
            let before = (state.memories.clone(), state.connections.clone());
            let Some(removed) = state.remove_memory_cascade(id) else {
                return Err(SyncError::NotFound(id.to_string()).into());
            };
            for (_, conn) in &removed.connections {
                state.touch(conn.id.as_str());
                if online && conn.id.is_pending() {
                    self.inflight.bury(conn.id.as_str());
                }
            }
            let generation = state.touch(id);
            self.mirror(&state);
            if !online {
                debug!(memory_id = %id, "🗑️ 离线删除记忆");
                return Ok(());
            }
            if removed.memory.id.is_pending() {
                self.inflight.bury(id);
                debug!(temp_id = %id, "🪦 删除仍在新建中的记忆");
                return Ok(());
            }
            (before, removed, generation)
        };
        self.inflight.cancel(id);

        match self.gateway.delete_memory(id).await {
            Ok(()) => {
                info!(memory_id = %id, connections = removed.connections.len(), "🗑️ 记忆已删除");
                Ok(())
            }
            Err(e) => {
                let pending: Vec<String> = removed
                    .connections
                    .iter()
                    .filter(|(_, c)| c.id.is_pending())
                    .map(|(_, c)| c.id.as_str().to_string())
                    .collect();
                {
                    let mut state = self.write();
                    if state.revision() == generation {
                        state.memories = before.0;
                        state.connections = before.1;
                    } else {
                        state.reinsert(removed);
                    }
                    // 墓碑已被取走的临时连接已有回包（补删或失败），不再放回
                    for temp in &pending {
                        if !self.inflight.exhume(temp)
                            && let Some(index) = state.connection_index(temp)
                        {
                            state.connections.remove(index);
                        }
                    }
                    state.touch(id);
                    self.mirror(&state);
                }
                warn!(memory_id = %id, "↩️ 删除记忆失败，已回滚: {e}");
                Err(e)
            }
        }
    }

    /// 移动记忆到新位置
    ///
    /// 本地立即生效，远端请求在后台执行且失败不回滚；同一记忆上的新移动会取消旧请求。
    pub fn move_memory(&self, id: &str, position: Position) -> Result<()> {
        let remote = {
            let mut state = self.write();
            let index = state
                .memory_index(id)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            state.memories[index].position = Some(position);
            state.touch(id);
            self.mirror(&state);
            // 临时 id 的位置在提交时补发
            self.is_online() && !state.memories[index].id.is_pending()
        };
        if remote {
            self.spawn_remote_move(id, position);
        }
        Ok(())
    }

    fn spawn_remote_move(&self, id: &str, position: Position) {
        let ticket = self.inflight.begin_move(id);
        let gateway = self.gateway.clone();
        let inflight = self.inflight.clone();
        tokio::spawn(async move {
            let patch = MemoryPatch::position(position);
            tokio::select! {
                _ = ticket.token.cancelled() => {
                    debug!(memory_id = %ticket.id, "⏭️ 位置同步被新的移动取代");
                }
                result = gateway.update_memory(&ticket.id, &patch) => {
                    if let Err(e) = result {
                        warn!(memory_id = %ticket.id, "⚠️ 位置同步失败，保留本地位置: {e}");
                    }
                }
            }
            inflight.finish_move(&ticket);
        });
    }

    /// 拉取单条记忆的最新内容并合并进集合
    pub async fn fetch(&self, id: &str) -> Result<Memory> {
        let since = self.read().revision();
        let memory = self.gateway.get_memory(id).await?;
        {
            let mut state = self.write();
            if !state.touched_since(id, since) {
                match state.memory_index(id) {
                    Some(index) => state.memories[index] = memory.clone(),
                    None => state.memories.push(memory.clone()),
                }
                state.bump();
                self.mirror(&state);
            }
        }
        Ok(memory)
    }

    // ── 连接 ──

    /// 连接两条记忆
    ///
    /// 两者之间已有任一方向的连接时返回 `Ok(None)`，不发起请求。
    pub async fn connect(&self, source: &str, target: &str) -> Result<Option<Connection>> {
        let online = self.is_online();
        let temp_id = {
            let mut state = self.write();
            if state.is_linked(source, target) {
                debug!(source, target, "⏭️ 连接已存在");
                return Ok(None);
            }
            for endpoint in [source, target] {
                let memory = state
                    .memory(endpoint)
                    .ok_or_else(|| SyncError::NotFound(endpoint.to_string()))?;
                if online && memory.id.is_pending() {
                    return Err(SyncError::Pending(endpoint.to_string()).into());
                }
            }

            let id = if online {
                EntityId::temporary_connection()
            } else {
                EntityId::local()
            };
            let connection = Connection {
                id: id.clone(),
                source: source.to_string(),
                target: target.to_string(),
            };
            state.touch(id.as_str());
            state.connections.push(connection.clone());
            self.mirror(&state);
            if !online {
                debug!(source, target, "🔗 离线新建连接");
                return Ok(Some(connection));
            }
            id
        };

        match self.gateway.create_connection(source, target).await {
            Ok(server) => Ok(Some(self.commit_connection(&temp_id, server).await)),
            Err(e) => {
                {
                    let mut state = self.write();
                    if let Some(index) = state.connection_index(temp_id.as_str()) {
                        state.connections.remove(index);
                    }
                    state.touch(temp_id.as_str());
                    self.mirror(&state);
                }
                self.inflight.exhume(temp_id.as_str());
                warn!(source, target, "↩️ 新建连接失败，已回滚: {e}");
                Err(e)
            }
        }
    }

    async fn commit_connection(&self, temp_id: &EntityId, server: Connection) -> Connection {
        let server_id = server.id.as_str().to_string();

        if self.inflight.exhume(temp_id.as_str()) {
            {
                let mut state = self.write();
                if let Some(index) = state.connection_index(temp_id.as_str()) {
                    state.connections.remove(index);
                }
                state.touch(temp_id.as_str());
                self.mirror(&state);
            }
            info!(temp_id = %temp_id, server_id = %server_id, "🪦 连接回包前已被删除，补发远端删除");
            if let Err(e) = self.gateway.delete_connection(&server_id).await {
                warn!(server_id = %server_id, "⚠️ 补发删除失败: {e}");
            }
            return server;
        }

        let mut state = self.write();
        if let Some(index) = state.connection_index(temp_id.as_str()) {
            if state.connection_index(&server_id).is_some() {
                state.connections.remove(index);
            } else {
                let mut committed = server.clone();
                committed.id = temp_id.clone().commit(server_id.clone());
                state.connections[index] = committed;
            }
            state.rename(temp_id.as_str(), &server_id);
            state.bump();
            self.mirror(&state);
            debug!(temp_id = %temp_id, server_id = %server_id, "✅ 连接已提交");
        }
        server
    }

    /// 删除连接
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let online = self.is_online();
        let (before, index, removed, generation) = {
            let mut state = self.write();
            let index = state
                .connection_index(id)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            let before = state.connections.clone();
            let removed = state.connections.remove(index);
            let generation = state.touch(id);
            self.mirror(&state);
            if !online {
                return Ok(());
            }
            if removed.id.is_pending() {
                self.inflight.bury(id);
                return Ok(());
            }
            (before, index, removed, generation)
        };

        match self.gateway.delete_connection(id).await {
            Ok(()) => {
                debug!(connection_id = %id, "✂️ 连接已删除");
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.write();
                    if state.revision() == generation {
                        state.connections = before;
                    } else if state.connection_index(id).is_none()
                        && !state.is_linked(&removed.source, &removed.target)
                        && state.memory_index(&removed.source).is_some()
                        && state.memory_index(&removed.target).is_some()
                    {
                        let index = index.min(state.connections.len());
                        state.connections.insert(index, removed);
                    }
                    state.touch(id);
                    self.mirror(&state);
                }
                warn!(connection_id = %id, "↩️ 删除连接失败，已回滚: {e}");
                Err(e)
            }
        }
    }

    // ── 加载 ──

    /// 从远端重新加载首页记忆与全部连接
    ///
    /// 已加载过且 `force == false` 时直接返回。加载失败保留现有（缓存）数据。
    /// 请求期间被本地改动过的实体以本地为准，临时条目保留。
    pub async fn refresh(&self, force: bool) -> Result<()> {
        if !self.is_online() {
            debug!("📴 离线模式，跳过远端加载");
            return Ok(());
        }
        let since = {
            let mut state = self.write();
            if state.loaded && !force {
                debug!("⏭️ 已加载过，跳过刷新");
                return Ok(());
            }
            if state.memories.is_empty() {
                state.loading = true;
            }
            state.revision()
        };

        let result = futures::try_join!(
            self.gateway.list_memories(self.page_size, 0),
            self.gateway.list_connections()
        );

        let mut state = self.write();
        state.loading = false;
        let (page, remote_connections) = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("⚠️ 刷新失败，保留现有数据: {e}");
                return Err(e);
            }
        };

        let fetched = page.memories.len();
        let mut memories = Vec::with_capacity(fetched);
        for remote in page.memories {
            if !state.touched_since(remote.id.as_str(), since) {
                memories.push(remote);
            } else if let Some(local) = state.memory(remote.id.as_str()) {
                memories.push(local.clone());
            }
        }
        for local in &state.memories {
            let keep = local.id.is_pending() || state.touched_since(local.id.as_str(), since);
            if keep && !memories.iter().any(|m| m.id == local.id) {
                memories.push(local.clone());
            }
        }

        let mut connections = Vec::with_capacity(remote_connections.len());
        for remote in remote_connections {
            if !state.touched_since(remote.id.as_str(), since) {
                connections.push(remote);
            } else if let Some(index) = state.connection_index(remote.id.as_str()) {
                connections.push(state.connections[index].clone());
            }
        }
        for local in &state.connections {
            let keep = local.id.is_pending() || state.touched_since(local.id.as_str(), since);
            if keep && !connections.iter().any(|c| c.id == local.id) {
                connections.push(local.clone());
            }
        }

        state.memories = memories;
        state.connections = connections;
        state.total_count = Some(page.total_count);
        state.has_more = fetched == self.page_size && fetched < page.total_count;
        state.loaded = true;
        state.bump();
        self.mirror(&state);
        info!(
            memories = state.memories.len(),
            connections = state.connections.len(),
            total = page.total_count,
            has_more = state.has_more,
            "🔄 刷新完成"
        );
        Ok(())
    }

    /// 加载下一页，返回新增的记忆条数
    ///
    /// 已无更多或上一次加载尚未结束时直接返回 `Ok(0)`，不发起请求。
    pub async fn load_more(&self) -> Result<usize> {
        if !self.is_online() {
            return Ok(0);
        }
        let (offset, since) = {
            let mut state = self.write();
            if !state.has_more || state.loading_more {
                return Ok(0);
            }
            state.loading_more = true;
            (state.committed_memory_count(), state.revision())
        };
        debug!(offset, limit = self.page_size, "📄 加载下一页");

        let result = self.gateway.list_memories(self.page_size, offset).await;

        let mut state = self.write();
        state.loading_more = false;
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(offset, "⚠️ 加载下一页失败: {e}");
                return Err(e);
            }
        };

        let fetched = page.memories.len();
        let mut appended = 0;
        for memory in page.memories {
            let id = memory.id.as_str();
            // 本地已有或请求期间被本地删除的条目不追加
            if state.memory_index(id).is_some() || state.touched_since(id, since) {
                continue;
            }
            state.memories.push(memory);
            appended += 1;
        }
        state.total_count = Some(page.total_count);
        state.has_more =
            fetched == self.page_size && state.committed_memory_count() < page.total_count;
        state.bump();
        self.mirror(&state);
        info!(appended, total = page.total_count, has_more = state.has_more, "📄 下一页已加载");
        Ok(appended)
    }

    // ── 用户 ──

    /// 拉取当前用户资料并记入会话
    pub async fn load_profile(&self) -> Result<UserProfile> {
        if !self.is_online() {
            return Err(SyncError::NoSession.into());
        }
        let profile = self.gateway.current_user().await?;
        self.session.set_profile(profile.clone());
        debug!(user = %profile.email, premium = profile.is_premium, "👤 用户资料已更新");
        Ok(profile)
    }

    /// 升级为会员，并返回升级后的资料
    pub async fn upgrade_premium(&self) -> Result<UserProfile> {
        if !self.is_online() {
            return Err(SyncError::NoSession.into());
        }
        self.gateway.upgrade_to_premium().await?;
        let profile = self.load_profile().await?;
        info!(user = %profile.email, "⭐ 已升级为会员");
        Ok(profile)
    }

    /// 结束会话，清空内存状态并删除该用户与旧版的缓存
    pub async fn logout(&self) -> Option<Session> {
        let ended = self.session.logout();
        self.inflight.cancel_all();
        self.write().clear();
        if let Some(session) = &ended {
            self.mirror.remove(&session.cache_key()).await;
        }
        self.mirror.remove(CACHE_KEY_PREFIX).await;
        ended
    }

    // ── 本地设置 ──

    /// 清空所有记忆与连接（仅本地，不通知服务端）
    pub async fn clear_all(&self) {
        self.inflight.cancel_all();
        self.write().clear();
        if let Some(key) = self.session.cache_key() {
            self.mirror.remove(&key).await;
        }
        self.mirror.remove(CACHE_KEY_PREFIX).await;
        info!("🧹 已清空本地图谱");
    }

    /// 切换深色模式，返回切换后的值
    pub fn toggle_dark_mode(&self) -> bool {
        let mut state = self.write();
        state.dark_mode = !state.dark_mode;
        state.bump();
        self.mirror(&state);
        state.dark_mode
    }

    /// 等待所有待写快照落盘
    pub async fn flush(&self) {
        self.mirror.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemolinkError;
    use crate::testing::{GatewayOp, MockGateway};

    fn profile(premium: bool, limit: usize) -> UserProfile {
        UserProfile {
            id: "7".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            created_at: None,
            is_premium: premium,
            memory_limit: limit,
        }
    }

    fn online(gateway: MockGateway) -> (Arc<MockGateway>, Arc<InMemoryCache>, Arc<MemorySync>) {
        let gateway = Arc::new(gateway);
        let cache = Arc::new(InMemoryCache::new());
        let session = SessionHandle::with_session(Session::new("token", "alice"));
        let sync = MemorySync::builder(gateway.clone(), session)
            .cache(cache.clone())
            .cache_window(Duration::from_millis(10))
            .build();
        (gateway, cache, Arc::new(sync))
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn titles(sync: &MemorySync) -> Vec<String> {
        sync.memories().into_iter().map(|m| m.title).collect()
    }

    #[tokio::test]
    async fn test_create_replaces_temporary_id() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_next_id(42));
        let hold = gateway.hold_next(GatewayOp::CreateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.create(MemoryDraft::new("Trip")).await })
        };
        gateway.wait_for_calls(GatewayOp::CreateMemory, 1).await;

        let pending = sync.memories();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].id.is_pending());
        assert!(pending[0].id.as_str().starts_with("temp-"));
        assert_eq!(pending[0].title, "Trip");

        hold.release();
        let created = task.await.unwrap().unwrap();
        assert_eq!(created.id.as_str(), "42");

        let memories = sync.memories();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].id, EntityId::committed("42"));
        assert!(sync.memory(pending[0].id.as_str()).is_none());
    }

    #[tokio::test]
    async fn test_create_failure_rolls_back() {
        let (gateway, _cache, sync) = online(MockGateway::new());
        gateway.fail_next(GatewayOp::CreateMemory, "connection refused");

        let err = sync.create(MemoryDraft::new("Trip")).await.unwrap_err();
        assert!(err.is_transport());
        assert!(sync.memories().is_empty());
    }

    #[tokio::test]
    async fn test_delete_during_create_sends_compensating_delete() {
        let (gateway, _cache, sync) = online(MockGateway::new());
        let hold = gateway.hold_next(GatewayOp::CreateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.create(MemoryDraft::new("Oops")).await })
        };
        gateway.wait_for_calls(GatewayOp::CreateMemory, 1).await;

        let temp = sync.memories()[0].id.clone();
        sync.delete(temp.as_str()).await.unwrap();
        assert!(sync.memories().is_empty());
        assert_eq!(gateway.call_count(GatewayOp::DeleteMemory), 0);

        hold.release();
        let created = task.await.unwrap().unwrap();
        assert!(!created.id.is_pending());
        assert!(sync.memory(created.id.as_str()).is_none());
        assert!(sync.memories().is_empty());
        assert_eq!(gateway.call_count(GatewayOp::DeleteMemory), 1);
        assert!(gateway.server_memories().is_empty());
    }

    #[tokio::test]
    async fn test_delete_rollback_drops_link_resolved_meanwhile() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(2));
        sync.refresh(true).await.unwrap();

        let connect_hold = gateway.hold_next(GatewayOp::CreateConnection);
        let connect = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.connect("1", "2").await })
        };
        gateway.wait_for_calls(GatewayOp::CreateConnection, 1).await;

        gateway.fail_next(GatewayOp::DeleteMemory, "timeout");
        let delete_hold = gateway.hold_next(GatewayOp::DeleteMemory);
        let delete = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.delete("1").await })
        };
        gateway.wait_for_calls(GatewayOp::DeleteMemory, 1).await;

        // 连接回包先到：本地已删，补发远端删除
        connect_hold.release();
        assert!(connect.await.unwrap().unwrap().is_some());
        assert_eq!(gateway.call_count(GatewayOp::DeleteConnection), 1);
        assert!(gateway.server_connections().is_empty());

        delete_hold.release();
        assert!(delete.await.unwrap().is_err());
        assert_eq!(sync.memories().len(), 2);
        assert!(sync.connections().is_empty());

        let again = sync.connect("1", "2").await.unwrap();
        assert!(again.is_some());
        let connections = sync.connections();
        assert_eq!(connections.len(), 1);
        assert!(!connections[0].id.is_pending());
        assert_eq!(gateway.server_connections().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_rollback_keeps_link_still_in_flight() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(2));
        sync.refresh(true).await.unwrap();

        let hold = gateway.hold_next(GatewayOp::CreateConnection);
        let connect = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.connect("1", "2").await })
        };
        gateway.wait_for_calls(GatewayOp::CreateConnection, 1).await;

        gateway.fail_next(GatewayOp::DeleteMemory, "timeout");
        assert!(sync.delete("1").await.is_err());
        let connections = sync.connections();
        assert_eq!(connections.len(), 1);
        assert!(connections[0].id.is_pending());

        hold.release();
        assert!(connect.await.unwrap().unwrap().is_some());
        let connections = sync.connections();
        assert_eq!(connections.len(), 1);
        assert!(!connections[0].id.is_pending());
        assert_eq!(gateway.call_count(GatewayOp::DeleteConnection), 0);
        assert_eq!(gateway.server_connections().len(), 1);
    }

    #[tokio::test]
    async fn test_update_applies_server_representation() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(1));
        sync.refresh(true).await.unwrap();
        // 服务端在客户端不知情时改了描述
        gateway
            .update_memory("1", &MemoryPatch::default().description("server side"))
            .await
            .unwrap();

        let updated = sync
            .update("1", MemoryPatch::default().title("Renamed"))
            .await
            .unwrap();
        assert_eq!(updated.description, "server side");
        let local = sync.memory("1").unwrap();
        assert_eq!(local.title, "Renamed");
        assert_eq!(local.description, "server side");
    }

    #[tokio::test]
    async fn test_update_failure_restores_exactly() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(3));
        sync.refresh(true).await.unwrap();
        let before = sync.memories();

        gateway.fail_next(GatewayOp::UpdateMemory, "timeout");
        let hold = gateway.hold_next(GatewayOp::UpdateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move {
                sync.update("2", MemoryPatch::default().title("Changed").tags(["x"]))
                    .await
            })
        };
        gateway.wait_for_calls(GatewayOp::UpdateMemory, 1).await;
        assert_eq!(sync.memory("2").unwrap().title, "Changed");

        hold.release();
        assert!(task.await.unwrap().is_err());
        assert_eq!(sync.memories(), before);
    }

    #[tokio::test]
    async fn test_update_unknown_and_pending() {
        let (gateway, _cache, sync) = online(MockGateway::new());
        let err = sync.update("404", MemoryPatch::default().title("x")).await;
        assert!(matches!(err, Err(MemolinkError::Sync(SyncError::NotFound(_)))));

        let hold = gateway.hold_next(GatewayOp::CreateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.create(MemoryDraft::new("New")).await })
        };
        gateway.wait_for_calls(GatewayOp::CreateMemory, 1).await;
        let temp = sync.memories()[0].id.clone();
        let err = sync.update(temp.as_str(), MemoryPatch::default().title("x")).await;
        assert!(matches!(err, Err(MemolinkError::Sync(SyncError::Pending(_)))));
        assert_eq!(gateway.call_count(GatewayOp::UpdateMemory), 0);

        hold.release();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stale_update_response_ignored_after_move() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(1));
        sync.refresh(true).await.unwrap();

        let hold = gateway.hold_next(GatewayOp::UpdateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.update("1", MemoryPatch::default().title("New")).await })
        };
        gateway.wait_for_calls(GatewayOp::UpdateMemory, 1).await;

        let dragged = Position::new(5.0, 5.0);
        sync.move_memory("1", dragged).unwrap();
        hold.release();
        task.await.unwrap().unwrap();

        let local = sync.memory("1").unwrap();
        assert_eq!(local.title, "New");
        assert_eq!(local.position, Some(dragged));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_rolls_back() {
        let gateway = MockGateway::new()
            .with_memories(3)
            .with_connection("1", "2")
            .with_connection("3", "1")
            .with_connection("2", "3");
        let (gateway, _cache, sync) = online(gateway);
        sync.refresh(true).await.unwrap();
        let memories = sync.memories();
        let connections = sync.connections();

        gateway.fail_next(GatewayOp::DeleteMemory, "503");
        let hold = gateway.hold_next(GatewayOp::DeleteMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.delete("1").await })
        };
        gateway.wait_for_calls(GatewayOp::DeleteMemory, 1).await;
        assert_eq!(sync.memories().len(), 2);
        assert_eq!(sync.connections().len(), 1);
        assert!(sync.connections().iter().all(|c| !c.touches("1")));

        hold.release();
        assert!(task.await.unwrap().is_err());
        assert_eq!(sync.memories(), memories);
        assert_eq!(sync.connections(), connections);
    }

    #[tokio::test]
    async fn test_delete_success_removes_links() {
        let gateway = MockGateway::new()
            .with_memories(2)
            .with_connection("1", "2");
        let (gateway, _cache, sync) = online(gateway);
        sync.refresh(true).await.unwrap();

        sync.delete("2").await.unwrap();
        assert_eq!(titles(&sync), vec!["Memory 1"]);
        assert!(sync.connections().is_empty());
        assert!(gateway.server_connections().is_empty());
    }

    #[tokio::test]
    async fn test_connect_is_direction_agnostic() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(2));
        sync.refresh(true).await.unwrap();

        let first = sync.connect("1", "2").await.unwrap();
        assert!(first.is_some());
        assert!(sync.connect("2", "1").await.unwrap().is_none());
        assert!(sync.connect("1", "2").await.unwrap().is_none());

        assert_eq!(sync.connections().len(), 1);
        assert!(!sync.connections()[0].id.is_pending());
        assert_eq!(gateway.call_count(GatewayOp::CreateConnection), 1);
    }

    #[tokio::test]
    async fn test_connect_pending_endpoint_rejected() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(1));
        sync.refresh(true).await.unwrap();
        let hold = gateway.hold_next(GatewayOp::CreateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.create(MemoryDraft::new("New")).await })
        };
        gateway.wait_for_calls(GatewayOp::CreateMemory, 1).await;

        let temp = sync
            .memories()
            .into_iter()
            .find(|m| m.id.is_pending())
            .unwrap()
            .id;
        let err = sync.connect(temp.as_str(), "1").await;
        assert!(matches!(err, Err(MemolinkError::Sync(SyncError::Pending(_)))));
        let err = sync.connect("1", "missing").await;
        assert!(matches!(err, Err(MemolinkError::Sync(SyncError::NotFound(_)))));

        hold.release();
        let created = task.await.unwrap().unwrap();
        assert!(sync.connect(created.id.as_str(), "1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_and_disconnect_rollback() {
        let gateway = MockGateway::new()
            .with_memories(3)
            .with_connection("1", "2");
        let (gateway, _cache, sync) = online(gateway);
        sync.refresh(true).await.unwrap();
        let before = sync.connections();

        gateway.fail_next(GatewayOp::CreateConnection, "timeout");
        assert!(sync.connect("2", "3").await.is_err());
        assert_eq!(sync.connections(), before);

        gateway.fail_next(GatewayOp::DeleteConnection, "timeout");
        let id = before[0].id.clone();
        assert!(sync.disconnect(id.as_str()).await.is_err());
        assert_eq!(sync.connections(), before);

        sync.disconnect(id.as_str()).await.unwrap();
        assert!(sync.connections().is_empty());
        assert!(gateway.server_connections().is_empty());
    }

    #[tokio::test]
    async fn test_short_first_page_stops_pagination() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(5));
        sync.refresh(true).await.unwrap();
        assert_eq!(sync.memories().len(), 5);
        assert!(!sync.has_more());
        assert_eq!(sync.total_count(), Some(5));

        assert_eq!(sync.load_more().await.unwrap(), 0);
        assert_eq!(gateway.call_count(GatewayOp::ListMemories), 1);
    }

    #[tokio::test]
    async fn test_load_more_pages_through() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(85));
        sync.refresh(true).await.unwrap();
        assert_eq!(sync.memories().len(), 40);
        assert!(sync.has_more());

        assert_eq!(sync.load_more().await.unwrap(), 40);
        assert!(sync.has_more());
        assert_eq!(sync.load_more().await.unwrap(), 5);
        assert!(!sync.has_more());
        assert_eq!(sync.load_more().await.unwrap(), 0);

        assert_eq!(sync.memories().len(), 85);
        let offsets: Vec<String> = gateway
            .calls()
            .into_iter()
            .filter(|c| c.op == GatewayOp::ListMemories)
            .map(|c| c.args[1].clone())
            .collect();
        assert_eq!(offsets, vec!["0", "40", "80"]);
    }

    #[tokio::test]
    async fn test_refresh_skipped_unless_forced() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(2));
        sync.refresh(false).await.unwrap();
        sync.refresh(false).await.unwrap();
        assert_eq!(gateway.call_count(GatewayOp::ListMemories), 1);
        sync.refresh(true).await.unwrap();
        assert_eq!(gateway.call_count(GatewayOp::ListMemories), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_cached_data() {
        let (gateway, cache, sync) = online(MockGateway::new().with_memories(2));
        let cached = CacheSnapshot {
            memories: vec![MemoryDraft::new("Cached").into_memory(EntityId::committed("9"))],
            ..Default::default()
        };
        cache.put("memolink_data_alice", cached).await.unwrap();
        assert_eq!(sync.restore_cached().await.unwrap(), 1);

        gateway.fail_next(GatewayOp::ListConnections, "offline");
        assert!(sync.refresh(false).await.is_err());
        assert_eq!(titles(&sync), vec!["Cached"]);
        assert!(!sync.is_loading());

        sync.refresh(false).await.unwrap();
        assert_eq!(titles(&sync), vec!["Memory 1", "Memory 2"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_pending_entries() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(1));
        let hold = gateway.hold_next(GatewayOp::CreateMemory);
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.create(MemoryDraft::new("Draft")).await })
        };
        gateway.wait_for_calls(GatewayOp::CreateMemory, 1).await;

        sync.refresh(true).await.unwrap();
        assert_eq!(sync.memories().len(), 2);
        assert!(sync.memories().iter().any(|m| m.id.is_pending()));

        hold.release();
        task.await.unwrap().unwrap();
        assert_eq!(sync.memories().len(), 2);
        assert!(sync.memories().iter().all(|m| !m.id.is_pending()));
    }

    #[tokio::test]
    async fn test_move_is_fire_and_forget() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(1));
        sync.refresh(true).await.unwrap();

        gateway.fail_next(GatewayOp::UpdateMemory, "timeout");
        let target = Position::new(120.0, -40.0);
        sync.move_memory("1", target).unwrap();
        assert_eq!(sync.memory("1").unwrap().position, Some(target));

        gateway.wait_for_calls(GatewayOp::UpdateMemory, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sync.memory("1").unwrap().position, Some(target));
        assert!(sync.move_memory("missing", target).is_err());
    }

    #[tokio::test]
    async fn test_newer_move_cancels_inflight_request() {
        let (gateway, _cache, sync) = online(MockGateway::new().with_memories(1));
        sync.refresh(true).await.unwrap();

        let _hold = gateway.hold_next(GatewayOp::UpdateMemory);
        sync.move_memory("1", Position::new(1.0, 1.0)).unwrap();
        gateway.wait_for_calls(GatewayOp::UpdateMemory, 1).await;

        let last = Position::new(2.0, 2.0);
        sync.move_memory("1", last).unwrap();
        gateway.wait_for_calls(GatewayOp::UpdateMemory, 2).await;
        eventually(|| gateway.completed_count(GatewayOp::UpdateMemory) == 1).await;

        assert_eq!(gateway.server_memories()[0].position, Some(last));
        assert_eq!(sync.memory("1").unwrap().position, Some(last));
    }

    #[tokio::test]
    async fn test_quota_blocks_free_users() {
        let (gateway, _cache, sync) =
            online(MockGateway::new().with_profile(profile(false, 2)));
        sync.load_profile().await.unwrap();

        sync.create(MemoryDraft::new("a")).await.unwrap();
        sync.create(MemoryDraft::new("b")).await.unwrap();
        let err = sync.create(MemoryDraft::new("c")).await;
        assert!(matches!(
            err,
            Err(MemolinkError::Sync(SyncError::QuotaExceeded { limit: 2 }))
        ));
        assert_eq!(gateway.call_count(GatewayOp::CreateMemory), 2);

        let upgraded = sync.upgrade_premium().await.unwrap();
        assert!(upgraded.is_premium);
        sync.create(MemoryDraft::new("c")).await.unwrap();
        assert_eq!(sync.memories().len(), 3);
    }

    #[tokio::test]
    async fn test_bootstrap_loads_profile_for_quota() {
        let gateway = MockGateway::new()
            .with_memories(30)
            .with_profile(profile(false, 30));
        let (gateway, _cache, sync) = online(gateway);
        sync.bootstrap().await.unwrap();
        assert!(sync.session().profile().is_some());
        assert_eq!(sync.memories().len(), 30);

        let err = sync.create(MemoryDraft::new("31st")).await;
        assert!(matches!(
            err,
            Err(MemolinkError::Sync(SyncError::QuotaExceeded { limit: 30 }))
        ));
        assert_eq!(gateway.call_count(GatewayOp::CreateMemory), 0);
        assert_eq!(sync.memories().len(), 30);
    }

    #[tokio::test]
    async fn test_quota_falls_back_to_default_limit() {
        // 服务端拿不到资料，按配置的默认上限计
        let gateway = Arc::new(MockGateway::new().with_memories(3));
        let session = SessionHandle::with_session(Session::new("token", "alice"));
        let config = ClientConfig {
            default_memory_limit: 3,
            ..ClientConfig::default()
        };
        let sync = MemorySync::builder(gateway.clone(), session)
            .config(&config)
            .cache_window(Duration::from_millis(10))
            .build();
        sync.bootstrap().await.unwrap();
        assert!(sync.session().profile().is_none());

        let err = sync.create(MemoryDraft::new("d")).await;
        assert!(matches!(
            err,
            Err(MemolinkError::Sync(SyncError::QuotaExceeded { limit: 3 }))
        ));
        assert_eq!(gateway.call_count(GatewayOp::CreateMemory), 0);

        sync.delete("3").await.unwrap();
        sync.create(MemoryDraft::new("d")).await.unwrap();
        assert_eq!(sync.memories().len(), 3);
    }

    #[tokio::test]
    async fn test_state_is_mirrored_to_cache() {
        let (_gateway, cache, sync) = online(MockGateway::new().with_next_id(42));
        sync.create(MemoryDraft::new("Trip")).await.unwrap();
        assert!(sync.toggle_dark_mode());
        sync.flush().await;

        let snapshot = cache.get("memolink_data_alice").await.unwrap().unwrap();
        assert_eq!(snapshot.memories.len(), 1);
        assert_eq!(snapshot.memories[0].id, "42");
        assert!(snapshot.dark_mode);
    }

    #[tokio::test]
    async fn test_restore_drops_pending_entries() {
        let (_gateway, cache, sync) = online(MockGateway::new());
        let snapshot = CacheSnapshot {
            memories: vec![
                MemoryDraft::new("Kept").into_memory(EntityId::committed("1")),
                MemoryDraft::new("Lost").into_memory(EntityId::temporary()),
            ],
            ..Default::default()
        };
        cache.put("memolink_data_alice", snapshot).await.unwrap();

        assert_eq!(sync.restore_cached().await.unwrap(), 1);
        assert_eq!(titles(&sync), vec!["Kept"]);
    }

    #[tokio::test]
    async fn test_logout_clears_state_and_cache() {
        let (_gateway, cache, sync) = online(MockGateway::new());
        cache
            .put("memolink_data", CacheSnapshot::default())
            .await
            .unwrap();
        sync.create(MemoryDraft::new("Trip")).await.unwrap();
        sync.flush().await;
        assert!(cache.get("memolink_data_alice").await.unwrap().is_some());

        let ended = sync.logout().await;
        assert_eq!(ended.map(|s| s.user_id), Some("alice".to_string()));
        assert!(sync.memories().is_empty());
        assert!(!sync.session().is_active());
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_end_elsewhere_clears_state() {
        let (_gateway, cache, sync) = online(MockGateway::new());
        sync.create(MemoryDraft::new("Trip")).await.unwrap();
        sync.flush().await;

        // 例如网关收到 401
        sync.session().logout();
        eventually(|| sync.memories().is_empty()).await;
        let mut removed = false;
        for _ in 0..200 {
            if cache.get("memolink_data_alice").await.unwrap().is_none() {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(removed);
    }

    #[tokio::test]
    async fn test_offline_mode_stays_local() {
        let gateway = Arc::new(MockGateway::new());
        let cache = Arc::new(InMemoryCache::new());
        let sync = MemorySync::builder(gateway.clone(), SessionHandle::anonymous())
            .cache(cache.clone())
            .build();

        let a = sync.create(MemoryDraft::new("A")).await.unwrap();
        let b = sync.create(MemoryDraft::new("B")).await.unwrap();
        assert!(!a.id.is_pending());

        let link = sync.connect(a.id.as_str(), b.id.as_str()).await.unwrap();
        assert!(link.is_some());
        assert!(sync.connect(b.id.as_str(), a.id.as_str()).await.unwrap().is_none());
        sync.update(a.id.as_str(), MemoryPatch::default().title("A2"))
            .await
            .unwrap();
        sync.move_memory(b.id.as_str(), Position::new(3.0, 4.0)).unwrap();
        sync.refresh(true).await.unwrap();
        assert_eq!(sync.load_more().await.unwrap(), 0);
        sync.delete(a.id.as_str()).await.unwrap();

        assert_eq!(titles(&sync), vec!["B"]);
        assert!(sync.connections().is_empty());
        assert!(gateway.calls().is_empty());
        sync.flush().await;
        assert!(cache.keys().await.unwrap().is_empty());
        assert!(matches!(
            sync.load_profile().await,
            Err(MemolinkError::Sync(SyncError::NoSession))
        ));
    }

    #[tokio::test]
    async fn test_selectors_read_current_graph() {
        let gateway = MockGateway::new()
            .with_memories(3)
            .with_connection("1", "2")
            .with_connection("3", "1");
        let (_gateway, _cache, sync) = online(gateway);
        sync.refresh(true).await.unwrap();
        sync.update("2", MemoryPatch::default().tags(["trip"]))
            .await
            .unwrap();

        let neighbors = sync.neighbors("1");
        assert_eq!(neighbors.outgoing.len(), 1);
        assert_eq!(neighbors.incoming[0].id, "3");
        assert_eq!(sync.all_tags().into_iter().collect::<Vec<_>>(), vec!["trip"]);
        let tagged = sync.album(&AlbumQuery::default().tag("trip"));
        assert_eq!(tagged.len(), 1);
        assert_eq!(sync.recent(2).len(), 2);
    }
}
