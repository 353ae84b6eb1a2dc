//! 记忆图谱的数据模型
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`Memory`] | 一条记忆（图片 + 文本 + 标签），图谱中的节点 |
//! | [`Connection`] | 两条记忆之间的无向连接 |
//! | [`EntityId`] | 临时 id / 服务端 id 的标记联合 |
//! | [`CacheSnapshot`] | 按用户持久化的本地快照 |

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 临时 id 的统一前缀，反序列化时据此识别 [`EntityId::Pending`]
pub const TEMP_ID_PREFIX: &str = "temp-";

/// 当前快照格式版本
pub const SNAPSHOT_VERSION: u32 = 1;

// ── EntityId ─────────────────────────────────────────────────────────────────

/// 实体标识：客户端临时 id 或服务端分配的永久 id
///
/// 乐观创建时先以 `Pending` 入列，服务端确认后经 [`EntityId::commit`]
/// 一次性迁移为 `Committed`。序列化为普通字符串，以 `temp-` 开头的视为临时 id。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EntityId {
    Pending(String),
    Committed(String),
}

impl EntityId {
    /// 生成记忆的临时 id：`temp-<毫秒时间戳>-<随机后缀>`
    pub fn temporary() -> Self {
        EntityId::Pending(format!(
            "{}{}-{}",
            TEMP_ID_PREFIX,
            Utc::now().timestamp_millis(),
            short_suffix()
        ))
    }

    /// 生成连接的临时 id：`temp-conn-<毫秒时间戳>-<随机后缀>`
    pub fn temporary_connection() -> Self {
        EntityId::Pending(format!(
            "{}conn-{}-{}",
            TEMP_ID_PREFIX,
            Utc::now().timestamp_millis(),
            short_suffix()
        ))
    }

    /// 离线模式下直接生成的本地永久 id
    pub fn local() -> Self {
        EntityId::Committed(uuid::Uuid::new_v4().to_string())
    }

    pub fn committed(id: impl Into<String>) -> Self {
        EntityId::Committed(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityId::Pending(id) | EntityId::Committed(id) => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, EntityId::Pending(_))
    }

    /// `Pending → Committed` 状态迁移，已提交的 id 保持不变
    pub fn commit(self, server_id: impl Into<String>) -> Self {
        match self {
            EntityId::Pending(_) => EntityId::Committed(server_id.into()),
            committed => committed,
        }
    }
}

impl From<String> for EntityId {
    fn from(raw: String) -> Self {
        if raw.starts_with(TEMP_ID_PREFIX) {
            EntityId::Pending(raw)
        } else {
            EntityId::Committed(raw)
        }
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        match id {
            EntityId::Pending(id) | EntityId::Committed(id) => id,
        }
    }
}

impl PartialEq<str> for EntityId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for EntityId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn short_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ── Memory ───────────────────────────────────────────────────────────────────

/// 画布上的二维坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 一条记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: EntityId,
    pub title: String,
    pub description: String,
    /// 内联图片数据（data URL）或服务端图片引用
    pub image: String,
    /// 创建时间（ISO-8601）
    pub created_at: String,
    /// 用户自定义日期
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Memory {
    /// 解析 `created_at`，兼容带时区与不带时区两种写法
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// 新建记忆的草稿（尚无 id 与创建时间）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDraft {
    pub title: String,
    pub description: String,
    pub image: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
}

impl MemoryDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// 以给定 id 实例化为记忆，创建时间取当前时刻
    pub fn into_memory(self, id: EntityId) -> Memory {
        Memory {
            id,
            title: self.title,
            description: self.description,
            image: self.image,
            created_at: Utc::now().to_rfc3339(),
            date: self.date,
            position: self.position,
            tags: self.tags,
        }
    }
}

/// 局部更新，`None` 字段保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl MemoryPatch {
    pub fn position(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, memory: &mut Memory) {
        if let Some(title) = &self.title {
            memory.title = title.clone();
        }
        if let Some(description) = &self.description {
            memory.description = description.clone();
        }
        if let Some(image) = &self.image {
            memory.image = image.clone();
        }
        if let Some(tags) = &self.tags {
            memory.tags = tags.clone();
        }
        if let Some(date) = &self.date {
            memory.date = Some(date.clone());
        }
        if let Some(position) = self.position {
            memory.position = Some(position);
        }
    }
}

// ── Connection ───────────────────────────────────────────────────────────────

/// 两条记忆之间的连接，`{source, target}` 无序唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: EntityId,
    pub source: String,
    pub target: String,
}

impl Connection {
    /// 是否连接 `a` 与 `b`（不区分方向）
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }

    /// 任意一端是否为 `memory_id`
    pub fn touches(&self, memory_id: &str) -> bool {
        self.source == memory_id || self.target == memory_id
    }
}

// ── Snapshot / Profile ───────────────────────────────────────────────────────

/// 本地缓存快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(default = "snapshot_version")]
    pub version: u32,
    #[serde(default)]
    pub memories: Vec<Memory>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub dark_mode: bool,
}

fn snapshot_version() -> u32 {
    SNAPSHOT_VERSION
}

/// 当前登录用户的资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
    pub memory_limit: usize,
}

impl UserProfile {
    /// 非会员的条数上限；会员返回 `None`
    pub fn quota(&self) -> Option<usize> {
        if self.is_premium {
            None
        } else {
            Some(self.memory_limit)
        }
    }
}

/// 分页拉取的一页记忆
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPage {
    pub memories: Vec<Memory>,
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids_are_pending_and_unique() {
        let a = EntityId::temporary();
        let b = EntityId::temporary();
        assert!(a.is_pending());
        assert!(a.as_str().starts_with("temp-"));
        assert_ne!(a, b);
        assert!(EntityId::temporary_connection().as_str().starts_with("temp-conn-"));
    }

    #[test]
    fn test_commit_transition() {
        let id = EntityId::temporary().commit("42");
        assert_eq!(id, EntityId::Committed("42".to_string()));
        // 已提交的 id 不会被再次改写
        assert_eq!(id.clone().commit("43"), id);
    }

    #[test]
    fn test_entity_id_serializes_as_plain_string() {
        let memory = MemoryDraft::new("Trip").into_memory(EntityId::committed("7"));
        let json = serde_json::to_value(&memory).unwrap();
        assert_eq!(json["id"], "7");
        assert!(json.get("createdAt").is_some());

        let restored: Connection =
            serde_json::from_str(r#"{"id":"temp-conn-1-abc","source":"1","target":"2"}"#)
                .unwrap();
        assert!(restored.id.is_pending());
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut memory = MemoryDraft::new("Trip")
            .description("beach")
            .tag("summer")
            .into_memory(EntityId::committed("1"));
        MemoryPatch::default().title("Road trip").apply_to(&mut memory);
        assert_eq!(memory.title, "Road trip");
        assert_eq!(memory.description, "beach");
        assert!(memory.has_tag("summer"));
    }

    #[test]
    fn test_connection_is_undirected() {
        let conn = Connection {
            id: EntityId::committed("c1"),
            source: "1".to_string(),
            target: "2".to_string(),
        };
        assert!(conn.links("1", "2"));
        assert!(conn.links("2", "1"));
        assert!(!conn.links("1", "3"));
        assert!(conn.touches("2"));
    }

    #[test]
    fn test_parse_naive_timestamp() {
        assert!(parse_timestamp("2024-05-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_snapshot_defaults_missing_fields() {
        let snapshot: CacheSnapshot = serde_json::from_str(r#"{"memories":[]}"#).unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert!(!snapshot.dark_mode);
        assert!(snapshot.connections.is_empty());
    }
}
