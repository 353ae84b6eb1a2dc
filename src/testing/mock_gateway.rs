//! Mock 网关，用于在不发起真实 HTTP 请求的情况下测试同步层。
//!
//! 内部维护一个简易的"服务端"：自增 id、分页列表、连接去重，
//! 默认所有调用都成功；通过 [`MockGateway::fail_next`] 注入失败，
//! 通过 [`MockGateway::hold_next`] 让下一次调用挂起直到放行，用于测试在途窗口。
//!
//! # 示例
//!
//! ```rust
//! use memolink::testing::{GatewayOp, MockGateway};
//! use memolink::gateway::RemoteGateway;
//! use memolink::model::MemoryDraft;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let gateway = MockGateway::new().with_next_id(42);
//! let memory = gateway.create_memory(&MemoryDraft::new("Trip")).await.unwrap();
//! assert_eq!(memory.id.as_str(), "42");
//! assert_eq!(gateway.call_count(GatewayOp::CreateMemory), 1);
//! # }
//! ```

use crate::error::{GatewayError, MemolinkError, Result, SyncError};
use crate::gateway::RemoteGateway;
use crate::model::{
    Connection, EntityId, Memory, MemoryDraft, MemoryPage, MemoryPatch, UserProfile,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, oneshot};

/// 网关操作类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    CreateMemory,
    GetMemory,
    UpdateMemory,
    DeleteMemory,
    ListMemories,
    ListConnections,
    CreateConnection,
    DeleteConnection,
    CurrentUser,
    UpgradePremium,
}

/// 一次调用的记录
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    pub op: GatewayOp,
    /// 调用参数的简要描述（id、分页参数等）
    pub args: Vec<String>,
}

/// 挂起中的调用，调用 [`Hold::release`] 放行
pub struct Hold {
    tx: oneshot::Sender<()>,
}

impl Hold {
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

#[derive(Default)]
struct Server {
    memories: BTreeMap<u64, Memory>,
    connections: BTreeMap<u64, Connection>,
    next_id: u64,
    profile: Option<UserProfile>,
}

impl Server {
    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// 可脚本化、可观测的内存网关
pub struct MockGateway {
    server: Arc<Mutex<Server>>,
    failures: Arc<Mutex<HashMap<GatewayOp, VecDeque<String>>>>,
    holds: Arc<Mutex<HashMap<GatewayOp, VecDeque<oneshot::Receiver<()>>>>>,
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    completed: Arc<Mutex<Vec<GatewayOp>>>,
    called: Arc<Notify>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            server: Arc::new(Mutex::new(Server {
                next_id: 1,
                ..Default::default()
            })),
            failures: Arc::new(Mutex::new(HashMap::new())),
            holds: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            called: Arc::new(Notify::new()),
        }
    }

    /// 下一个分配的服务端 id
    pub fn with_next_id(self, id: u64) -> Self {
        self.server.lock().unwrap().next_id = id;
        self
    }

    /// 预置 `n` 条记忆，标题为 `Memory <id>`
    pub fn with_memories(self, n: usize) -> Self {
        {
            let mut server = self.server.lock().unwrap();
            for _ in 0..n {
                let id = server.allocate();
                let memory = MemoryDraft::new(format!("Memory {}", id))
                    .into_memory(EntityId::Committed(id.to_string()));
                server.memories.insert(id, memory);
            }
        }
        self
    }

    /// 预置一条连接
    pub fn with_connection(self, source: &str, target: &str) -> Self {
        {
            let mut server = self.server.lock().unwrap();
            let id = server.allocate();
            server.connections.insert(
                id,
                Connection {
                    id: EntityId::Committed(id.to_string()),
                    source: source.to_string(),
                    target: target.to_string(),
                },
            );
        }
        self
    }

    pub fn with_profile(self, profile: UserProfile) -> Self {
        self.server.lock().unwrap().profile = Some(profile);
        self
    }

    /// 让该操作的下一次调用返回网络错误
    pub fn fail_next(&self, op: GatewayOp, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// 让该操作的下一次调用挂起，直到返回的 [`Hold`] 被放行或丢弃
    pub fn hold_next(&self, op: GatewayOp) -> Hold {
        let (tx, rx) = oneshot::channel();
        self.holds
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(rx);
        Hold { tx }
    }

    /// 该操作被发起的次数（含挂起中、被取消的）
    pub fn call_count(&self, op: GatewayOp) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op == op).count()
    }

    /// 该操作执行完毕的次数（被取消的调用不计入）
    pub fn completed_count(&self, op: GatewayOp) -> usize {
        self.completed.lock().unwrap().iter().filter(|o| **o == op).count()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// 等待该操作至少被发起 `n` 次
    pub async fn wait_for_calls(&self, op: GatewayOp, n: usize) {
        loop {
            let notified = self.called.notified();
            if self.call_count(op) >= n {
                return;
            }
            notified.await;
        }
    }

    /// 服务端当前保存的记忆
    pub fn server_memories(&self) -> Vec<Memory> {
        self.server.lock().unwrap().memories.values().cloned().collect()
    }

    pub fn server_connections(&self) -> Vec<Connection> {
        self.server
            .lock()
            .unwrap()
            .connections
            .values()
            .cloned()
            .collect()
    }

    /// 记录调用、等待放行、注入失败
    async fn enter(&self, op: GatewayOp, args: Vec<String>) -> Result<()> {
        self.calls.lock().unwrap().push(GatewayCall { op, args });
        self.called.notify_waiters();

        let hold = self
            .holds
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(rx) = hold {
            let _ = rx.await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(message) => Err(MemolinkError::Gateway(GatewayError::NetworkError(message))),
            None => Ok(()),
        }
    }

    fn complete(&self, op: GatewayOp) {
        self.completed.lock().unwrap().push(op);
    }
}

fn parse_id(id: &str) -> Result<u64> {
    id.parse()
        .map_err(|_| MemolinkError::Sync(SyncError::NotFound(id.to_string())))
}

fn not_found(id: &str) -> MemolinkError {
    MemolinkError::Gateway(GatewayError::ApiError {
        status: 404,
        message: format!("{} not found", id),
    })
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn create_memory(&self, draft: &MemoryDraft) -> Result<Memory> {
        self.enter(GatewayOp::CreateMemory, vec![draft.title.clone()])
            .await?;
        let memory = {
            let mut server = self.server.lock().unwrap();
            let id = server.allocate();
            let memory = draft
                .clone()
                .into_memory(EntityId::Committed(id.to_string()));
            server.memories.insert(id, memory.clone());
            memory
        };
        self.complete(GatewayOp::CreateMemory);
        Ok(memory)
    }

    async fn get_memory(&self, id: &str) -> Result<Memory> {
        self.enter(GatewayOp::GetMemory, vec![id.to_string()]).await?;
        let key = parse_id(id)?;
        let memory = self.server.lock().unwrap().memories.get(&key).cloned();
        self.complete(GatewayOp::GetMemory);
        memory.ok_or_else(|| not_found(id))
    }

    async fn update_memory(&self, id: &str, patch: &MemoryPatch) -> Result<Memory> {
        self.enter(GatewayOp::UpdateMemory, vec![id.to_string()]).await?;
        let key = parse_id(id)?;
        let updated = {
            let mut server = self.server.lock().unwrap();
            server.memories.get_mut(&key).map(|memory| {
                patch.apply_to(memory);
                memory.clone()
            })
        };
        self.complete(GatewayOp::UpdateMemory);
        updated.ok_or_else(|| not_found(id))
    }

    async fn delete_memory(&self, id: &str) -> Result<()> {
        self.enter(GatewayOp::DeleteMemory, vec![id.to_string()]).await?;
        let key = parse_id(id)?;
        {
            let mut server = self.server.lock().unwrap();
            server.memories.remove(&key);
            server.connections.retain(|_, c| !c.touches(id));
        }
        self.complete(GatewayOp::DeleteMemory);
        Ok(())
    }

    async fn list_memories(&self, limit: usize, offset: usize) -> Result<MemoryPage> {
        self.enter(
            GatewayOp::ListMemories,
            vec![limit.to_string(), offset.to_string()],
        )
        .await?;
        let page = {
            let server = self.server.lock().unwrap();
            MemoryPage {
                memories: server
                    .memories
                    .values()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect(),
                total_count: server.memories.len(),
            }
        };
        self.complete(GatewayOp::ListMemories);
        Ok(page)
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        self.enter(GatewayOp::ListConnections, vec![]).await?;
        let connections = self.server_connections();
        self.complete(GatewayOp::ListConnections);
        Ok(connections)
    }

    async fn create_connection(&self, source: &str, target: &str) -> Result<Connection> {
        self.enter(
            GatewayOp::CreateConnection,
            vec![source.to_string(), target.to_string()],
        )
        .await?;
        let created = {
            let mut server = self.server.lock().unwrap();
            if server.connections.values().any(|c| c.links(source, target)) {
                None
            } else {
                let id = server.allocate();
                let connection = Connection {
                    id: EntityId::Committed(id.to_string()),
                    source: source.to_string(),
                    target: target.to_string(),
                };
                server.connections.insert(id, connection.clone());
                Some(connection)
            }
        };
        self.complete(GatewayOp::CreateConnection);
        created.ok_or_else(|| {
            MemolinkError::Gateway(GatewayError::ApiError {
                status: 409,
                message: "link already exists".to_string(),
            })
        })
    }

    async fn delete_connection(&self, id: &str) -> Result<()> {
        self.enter(GatewayOp::DeleteConnection, vec![id.to_string()])
            .await?;
        let key = parse_id(id)?;
        let removed = self.server.lock().unwrap().connections.remove(&key);
        self.complete(GatewayOp::DeleteConnection);
        removed.map(|_| ()).ok_or_else(|| not_found(id))
    }

    async fn current_user(&self) -> Result<UserProfile> {
        self.enter(GatewayOp::CurrentUser, vec![]).await?;
        let profile = self.server.lock().unwrap().profile.clone();
        self.complete(GatewayOp::CurrentUser);
        profile.ok_or(MemolinkError::Gateway(GatewayError::Unauthorized))
    }

    async fn upgrade_to_premium(&self) -> Result<()> {
        self.enter(GatewayOp::UpgradePremium, vec![]).await?;
        if let Some(profile) = self.server.lock().unwrap().profile.as_mut() {
            profile.is_premium = true;
        }
        self.complete(GatewayOp::UpgradePremium);
        Ok(())
    }
}
