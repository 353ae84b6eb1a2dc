//! 相册与仪表盘使用的只读查询

use crate::model::{Connection, Memory};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// 相册排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    DateNewest,
    DateOldest,
    TitleAz,
    TitleZa,
}

/// 相册筛选条件
#[derive(Debug, Clone, Default)]
pub struct AlbumQuery {
    /// 在标题、描述、标签中做不区分大小写的包含匹配
    pub search: Option<String>,
    /// 精确匹配的标签
    pub tag: Option<String>,
    pub sort: SortOrder,
}

impl AlbumQuery {
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    fn matches(&self, memory: &Memory) -> bool {
        let matches_search = match self.search.as_deref().map(str::to_lowercase) {
            None => true,
            Some(needle) if needle.is_empty() => true,
            Some(needle) => {
                memory.title.to_lowercase().contains(&needle)
                    || memory.description.to_lowercase().contains(&needle)
                    || memory
                        .tags
                        .iter()
                        .any(|t| t.to_lowercase().contains(&needle))
            }
        };
        let matches_tag = self.tag.as_deref().is_none_or(|tag| memory.has_tag(tag));
        matches_search && matches_tag
    }
}

/// 按条件筛选并排序
pub fn album(memories: &[Memory], query: &AlbumQuery) -> Vec<Memory> {
    let mut result: Vec<Memory> = memories
        .iter()
        .filter(|m| query.matches(m))
        .cloned()
        .collect();
    match query.sort {
        SortOrder::DateNewest => result.sort_by(|a, b| by_created(b, a)),
        SortOrder::DateOldest => result.sort_by(by_created),
        SortOrder::TitleAz => result.sort_by(|a, b| a.title.cmp(&b.title)),
        SortOrder::TitleZa => result.sort_by(|a, b| b.title.cmp(&a.title)),
    }
    result
}

fn by_created(a: &Memory, b: &Memory) -> Ordering {
    match (a.created_at_utc(), b.created_at_utc()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// 最近创建的 `n` 条
pub fn recent(memories: &[Memory], n: usize) -> Vec<Memory> {
    let mut sorted = album(memories, &AlbumQuery::default());
    sorted.truncate(n);
    sorted
}

/// 所有出现过的标签（去重、有序）
pub fn all_tags(memories: &[Memory]) -> BTreeSet<String> {
    memories.iter().flat_map(|m| m.tags.iter().cloned()).collect()
}

/// 与某条记忆相连的记忆
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    /// 以该记忆为 source 的连接指向的记忆
    pub outgoing: Vec<Memory>,
    /// 以该记忆为 target 的连接来自的记忆
    pub incoming: Vec<Memory>,
}

pub fn neighbors(memories: &[Memory], connections: &[Connection], id: &str) -> Neighbors {
    let find = |other: &str| memories.iter().find(|m| m.id == other).cloned();
    Neighbors {
        outgoing: connections
            .iter()
            .filter(|c| c.source == id)
            .filter_map(|c| find(c.target.as_str()))
            .collect(),
        incoming: connections
            .iter()
            .filter(|c| c.target == id)
            .filter_map(|c| find(c.source.as_str()))
            .collect(),
    }
}
