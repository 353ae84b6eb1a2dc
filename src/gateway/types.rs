//! 后端 `/nodes`、`/nodelinks`、`/users` 接口的请求与响应类型

use crate::error::{GatewayError, Result};
use crate::model::{Connection, EntityId, Memory, Position, UserProfile};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 后端返回的 id 可能是整数也可能是字符串
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireId {
    Int(i64),
    Str(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Int(n) => n.to_string(),
            WireId::Str(s) => s,
        }
    }
}

/// `POST /nodes/create_node` 请求体
#[derive(Debug, Serialize)]
pub struct CreateNodeBody<'a> {
    pub image_id: &'a str,
    pub description: &'a str,
    pub title: &'a str,
    pub tags: &'a BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<&'a str>,
}

/// `PUT /nodes/update_node` 请求体，未修改的字段不发送
#[derive(Debug, Serialize)]
pub struct UpdateNodeBody<'a> {
    pub node_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<&'a BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<&'a str>,
}

/// 后端节点
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDto {
    pub node_id: Option<WireId>,
    pub id: Option<WireId>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_id: Option<String>,
    pub image_data: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub custom_date: Option<String>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
}

impl NodeDto {
    /// 转为 [`Memory`]；缺少标题时使用 `default_title`
    pub fn into_memory(self, default_title: &str) -> Result<Memory> {
        let id = self
            .node_id
            .or(self.id)
            .ok_or_else(|| GatewayError::InvalidResponse("node without id".to_string()))?
            .into_string();
        let position = match (self.position_x, self.position_y) {
            (Some(x), Some(y)) => Some(Position::new(x, y)),
            _ => None,
        };
        Ok(Memory {
            id: EntityId::Committed(id),
            title: self
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| default_title.to_string()),
            description: self.description.unwrap_or_default(),
            image: self.image_data.or(self.image_id).unwrap_or_default(),
            created_at: self.created_at.unwrap_or_else(|| Utc::now().to_rfc3339()),
            date: self.custom_date,
            position,
            tags: self.tags.unwrap_or_default().into_iter().collect(),
        })
    }
}

/// `GET /nodes/list_nodes` 响应：新版带总数，旧版为裸数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NodeListDto {
    Paged {
        nodes: Vec<NodeDto>,
        total_count: Option<usize>,
    },
    Bare(Vec<NodeDto>),
}

/// 后端连接
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDto {
    pub link_id: Option<WireId>,
    pub id: Option<WireId>,
    pub source_node_id: Option<WireId>,
    pub target_node_id: Option<WireId>,
    pub source: Option<WireId>,
    pub target: Option<WireId>,
}

impl LinkDto {
    pub fn into_connection(self) -> Result<Connection> {
        let id = self
            .link_id
            .or(self.id)
            .ok_or_else(|| GatewayError::InvalidResponse("link without id".to_string()))?;
        let source = self
            .source_node_id
            .or(self.source)
            .ok_or_else(|| GatewayError::InvalidResponse("link without source".to_string()))?;
        let target = self
            .target_node_id
            .or(self.target)
            .ok_or_else(|| GatewayError::InvalidResponse("link without target".to_string()))?;
        Ok(Connection {
            id: EntityId::Committed(id.into_string()),
            source: source.into_string(),
            target: target.into_string(),
        })
    }
}

/// `POST /users/get_user_info` 响应
#[derive(Debug, Clone, Deserialize)]
pub struct UserDto {
    pub user_id: WireId,
    pub first_name: Option<String>,
    pub surname: Option<String>,
    #[serde(default)]
    pub email: String,
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_premium: Option<bool>,
    pub memory_limit: Option<usize>,
}

impl UserDto {
    pub fn into_profile(self, default_limit: usize) -> UserProfile {
        let first = self.first_name.unwrap_or_default();
        let last = self.surname.unwrap_or_default();
        let name = format!("{} {}", first, last).trim().to_string();
        UserProfile {
            id: self.user_id.into_string(),
            name: if name.is_empty() {
                "User".to_string()
            } else {
                name
            },
            email: self.email,
            created_at: self.created_at,
            is_premium: self.is_premium.unwrap_or(false),
            memory_limit: self.memory_limit.filter(|l| *l > 0).unwrap_or(default_limit),
        }
    }
}
