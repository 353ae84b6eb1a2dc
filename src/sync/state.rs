//! 同步层持有的内存状态

use crate::model::{CacheSnapshot, Connection, Memory, SNAPSHOT_VERSION};
use std::collections::HashMap;

/// 记忆图谱的权威内存副本
///
/// 每次变更都会推进 `revision`，并把被改动实体的代数记为当时的 revision。
/// 异步回包据此判断自己是否已被后续操作取代。
#[derive(Debug, Clone)]
pub(crate) struct GraphState {
    pub memories: Vec<Memory>,
    pub connections: Vec<Connection>,
    pub dark_mode: bool,
    /// 无缓存数据时的首次加载中
    pub loading: bool,
    /// 是否已有一次成功的远端加载
    pub loaded: bool,
    pub has_more: bool,
    pub loading_more: bool,
    pub total_count: Option<usize>,
    revision: u64,
    generations: HashMap<String, u64>,
}

impl Default for GraphState {
    fn default() -> Self {
        Self {
            memories: Vec::new(),
            connections: Vec::new(),
            dark_mode: false,
            loading: false,
            loaded: false,
            has_more: true,
            loading_more: false,
            total_count: None,
            revision: 0,
            generations: HashMap::new(),
        }
    }
}

/// 被级联删除的记忆及其连接，连同原位置，用于回滚
#[derive(Debug, Clone)]
pub(crate) struct Removed {
    pub index: usize,
    pub memory: Memory,
    pub connections: Vec<(usize, Connection)>,
}

impl GraphState {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 推进全局 revision（不关联具体实体）
    pub fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// 标记实体被改动，返回其新代数
    pub fn touch(&mut self, id: &str) -> u64 {
        let generation = self.bump();
        self.generations.insert(id.to_string(), generation);
        generation
    }

    pub fn generation(&self, id: &str) -> u64 {
        self.generations.get(id).copied().unwrap_or(0)
    }

    /// 实体在 `since` 之后是否被改动过
    pub fn touched_since(&self, id: &str, since: u64) -> bool {
        self.generation(id) > since
    }

    /// 临时 id 提交后沿用其代数
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(generation) = self.generations.remove(from) {
            self.generations.insert(to.to_string(), generation);
        }
    }

    pub fn memory_index(&self, id: &str) -> Option<usize> {
        self.memories.iter().position(|m| m.id == id)
    }

    pub fn memory(&self, id: &str) -> Option<&Memory> {
        self.memories.iter().find(|m| m.id == id)
    }

    pub fn connection_index(&self, id: &str) -> Option<usize> {
        self.connections.iter().position(|c| c.id == id)
    }

    /// 是否已存在 `a`、`b` 之间的连接（任一方向）
    pub fn is_linked(&self, a: &str, b: &str) -> bool {
        self.connections.iter().any(|c| c.links(a, b))
    }

    /// 删除记忆并级联删除所有引用它的连接
    pub fn remove_memory_cascade(&mut self, id: &str) -> Option<Removed> {
        let index = self.memory_index(id)?;
        let memory = self.memories.remove(index);
        let mut connections = Vec::new();
        let mut position = 0;
        self.connections.retain(|c| {
            let keep = !c.touches(id);
            if !keep {
                connections.push((position, c.clone()));
            }
            position += 1;
            keep
        });
        Some(Removed {
            index,
            memory,
            connections,
        })
    }

    /// 把级联删除的内容放回原位；已被其他操作重建的实体不重复插入
    pub fn reinsert(&mut self, removed: Removed) {
        let id = removed.memory.id.as_str().to_string();
        if self.memory_index(&id).is_none() {
            let index = removed.index.min(self.memories.len());
            self.memories.insert(index, removed.memory);
        }
        for (index, conn) in removed.connections {
            if self.connection_index(conn.id.as_str()).is_some()
                || self.is_linked(&conn.source, &conn.target)
            {
                continue;
            }
            let other = if conn.source == id {
                &conn.target
            } else {
                &conn.source
            };
            if other != &id && self.memory_index(other).is_none() {
                continue;
            }
            let index = index.min(self.connections.len());
            self.connections.insert(index, conn);
        }
    }

    /// 清空集合与加载标记，保留深色模式
    pub fn clear(&mut self) {
        self.memories.clear();
        self.connections.clear();
        self.loading = false;
        self.loaded = false;
        self.has_more = true;
        self.loading_more = false;
        self.total_count = None;
        self.bump();
    }

    /// 用缓存快照预填充，丢弃仍处于临时 id 阶段的条目
    pub fn restore(&mut self, snapshot: CacheSnapshot) -> usize {
        let memories: Vec<Memory> = snapshot
            .memories
            .into_iter()
            .filter(|m| !m.id.is_pending())
            .collect();
        let connections: Vec<Connection> = snapshot
            .connections
            .into_iter()
            .filter(|c| !c.id.is_pending())
            .collect();
        let restored = memories.len();
        self.memories = memories;
        self.connections = connections;
        self.dark_mode = snapshot.dark_mode;
        self.bump();
        restored
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            memories: self.memories.clone(),
            connections: self.connections.clone(),
            dark_mode: self.dark_mode,
        }
    }

    pub fn committed_memory_count(&self) -> usize {
        self.memories.iter().filter(|m| !m.id.is_pending()).count()
    }
}
