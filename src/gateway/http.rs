use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::RemoteGateway;
use crate::gateway::types::{
    CreateNodeBody, LinkDto, NodeDto, NodeListDto, UpdateNodeBody, UserDto, WireId,
};
use crate::model::{Connection, Memory, MemoryDraft, MemoryPage, MemoryPatch, UserProfile};
use crate::session::SessionHandle;

/// REST 后端网关
///
/// 每个请求携带会话的 Bearer token；收到 401 时结束会话，
/// 订阅了 [`SessionHandle`] 的组件随之清理本地状态。
pub struct HttpGateway {
    client: Client,
    base_url: String,
    session: SessionHandle,
    default_memory_limit: usize,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig, session: SessionHandle) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            session,
            default_memory_limit: config.default_memory_limit,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("🔒 Token 失效，结束会话");
            self.session.logout();
            return Err(GatewayError::Unauthorized.into());
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::ApiError {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()).into())
    }

    /// 健康检查
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.send_json(self.request(Method::GET, "/health")).await
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn create_memory(&self, draft: &MemoryDraft) -> Result<Memory> {
        let title = if draft.title.is_empty() {
            "Untitled"
        } else {
            draft.title.as_str()
        };
        let body = CreateNodeBody {
            image_id: &draft.image,
            description: &draft.description,
            title,
            tags: &draft.tags,
            position: draft.position,
            date: draft.date.as_deref(),
        };
        debug!(title = %title, image_len = draft.image.len(), "📤 create_node");
        let node: NodeDto = self
            .send_json(self.request(Method::POST, "/nodes/create_node").json(&body))
            .await?;
        let mut memory = node.into_memory(title)?;
        if memory.image.is_empty() {
            memory.image = draft.image.clone();
        }
        memory.date = memory.date.or_else(|| draft.date.clone());
        memory.position = memory.position.or(draft.position);
        Ok(memory)
    }

    async fn get_memory(&self, id: &str) -> Result<Memory> {
        let node: NodeDto = self
            .send_json(
                self.request(Method::POST, "/nodes/get_node_info")
                    .query(&[("node_id", id)]),
            )
            .await?;
        node.into_memory("Memory")
    }

    async fn update_memory(&self, id: &str, patch: &MemoryPatch) -> Result<Memory> {
        let body = UpdateNodeBody {
            node_id: id,
            image_id: patch.image.as_deref(),
            description: patch.description.as_deref(),
            title: patch.title.as_deref(),
            tags: patch.tags.as_ref(),
            position: patch.position,
            date: patch.date.as_deref(),
        };
        let node: NodeDto = self
            .send_json(self.request(Method::PUT, "/nodes/update_node").json(&body))
            .await?;
        let mut memory = node.into_memory(patch.title.as_deref().unwrap_or("Memory"))?;
        memory.date = memory.date.or_else(|| patch.date.clone());
        memory.position = memory.position.or(patch.position);
        Ok(memory)
    }

    async fn delete_memory(&self, id: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, "/nodes/delete_node")
                .query(&[("node_id", id)]),
        )
        .await?;
        Ok(())
    }

    async fn list_memories(&self, limit: usize, offset: usize) -> Result<MemoryPage> {
        let list: NodeListDto = self
            .send_json(
                self.request(Method::GET, "/nodes/list_nodes")
                    .query(&[("limit", limit), ("offset", offset)]),
            )
            .await?;
        let (nodes, total) = match list {
            NodeListDto::Paged { nodes, total_count } => (nodes, total_count),
            NodeListDto::Bare(nodes) => (nodes, None),
        };
        let memories = nodes
            .into_iter()
            .map(|node| node.into_memory("Memory"))
            .collect::<Result<Vec<_>>>()?;
        let total_count = total.unwrap_or(offset + memories.len());
        debug!(limit, offset, count = memories.len(), total_count, "📥 list_nodes");
        Ok(MemoryPage {
            memories,
            total_count,
        })
    }

    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let links: Vec<LinkDto> = self
            .send_json(self.request(Method::GET, "/nodelinks/list_links"))
            .await?;
        links.into_iter().map(LinkDto::into_connection).collect()
    }

    async fn create_connection(&self, source: &str, target: &str) -> Result<Connection> {
        let mut link: LinkDto = self
            .send_json(
                self.request(Method::POST, "/nodelinks/create_link")
                    .query(&[("source_node_id", source), ("target_node_id", target)]),
            )
            .await?;
        // 后端可能只回 link_id
        if link.source_node_id.is_none() && link.source.is_none() {
            link.source = Some(WireId::Str(source.to_string()));
        }
        if link.target_node_id.is_none() && link.target.is_none() {
            link.target = Some(WireId::Str(target.to_string()));
        }
        link.into_connection()
    }

    async fn delete_connection(&self, id: &str) -> Result<()> {
        self.send(
            self.request(Method::DELETE, "/nodelinks/delete_link")
                .query(&[("link_id", id)]),
        )
        .await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<UserProfile> {
        let user: UserDto = self
            .send_json(self.request(Method::POST, "/users/get_user_info"))
            .await?;
        Ok(user.into_profile(self.default_memory_limit))
    }

    async fn upgrade_to_premium(&self) -> Result<()> {
        self.send(self.request(Method::PUT, "/users/set_user_premium"))
            .await?;
        Ok(())
    }
}
