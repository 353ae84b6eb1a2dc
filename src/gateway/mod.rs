//! 远端网关抽象
//!
//! 同步层只依赖 [`RemoteGateway`]，具体传输由实现方负责：
//!
//! - [`HttpGateway`]：对接 REST 后端
//! - [`crate::testing::MockGateway`]：内存实现，用于测试

pub mod http;
pub mod types;

pub use http::HttpGateway;

use crate::error::Result;
use crate::model::{Connection, Memory, MemoryDraft, MemoryPage, MemoryPatch, UserProfile};
use async_trait::async_trait;

/// 记忆与连接的远端 CRUD 接口
///
/// 返回的实体 id 一律为 [`crate::model::EntityId::Committed`]。
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn create_memory(&self, draft: &MemoryDraft) -> Result<Memory>;

    async fn get_memory(&self, id: &str) -> Result<Memory>;

    /// 局部更新，返回服务端的最终形态
    async fn update_memory(&self, id: &str, patch: &MemoryPatch) -> Result<Memory>;

    async fn delete_memory(&self, id: &str) -> Result<()>;

    /// 分页列出记忆，同时返回总数
    async fn list_memories(&self, limit: usize, offset: usize) -> Result<MemoryPage>;

    async fn list_connections(&self) -> Result<Vec<Connection>>;

    async fn create_connection(&self, source: &str, target: &str) -> Result<Connection>;

    async fn delete_connection(&self, id: &str) -> Result<()>;

    /// 当前登录用户资料（会员状态与条数上限）
    async fn current_user(&self) -> Result<UserProfile>;

    async fn upgrade_to_premium(&self) -> Result<()>;
}
