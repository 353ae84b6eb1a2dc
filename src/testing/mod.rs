//! 测试基础设施
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockGateway`] | 替代真实后端，测试同步层的乐观更新、回滚与在途竞态 |
//!
//! 缓存侧直接使用 [`crate::cache::InMemoryCache`]。
//!
//! # 使用示例
//!
//! ```rust
//! use memolink::cache::InMemoryCache;
//! use memolink::model::MemoryDraft;
//! use memolink::session::{Session, SessionHandle};
//! use memolink::sync::MemorySync;
//! use memolink::testing::{GatewayOp, MockGateway};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let gateway = Arc::new(MockGateway::new());
//! let session = SessionHandle::with_session(Session::new("token", "alice"));
//! let sync = MemorySync::builder(gateway.clone(), session)
//!     .cache(Arc::new(InMemoryCache::new()))
//!     .build();
//!
//! gateway.fail_next(GatewayOp::CreateMemory, "connection refused");
//! assert!(sync.create(MemoryDraft::new("Trip")).await.is_err());
//! assert!(sync.memories().is_empty()); // 乐观插入已回滚
//! # }
//! ```

mod mock_gateway;

pub use mock_gateway::{GatewayCall, GatewayOp, Hold, MockGateway};
