//! 在途请求登记
//!
//! - 位置同步：每条记忆最多一个在途的 `move` 请求，新请求取消旧请求
//! - 墓碑：临时 id 在创建回包前被删除时记下，回包到达后补发远端删除

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct InflightRegistry {
    moves: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_ticket: Mutex<u64>,
    tombstones: Mutex<HashSet<String>>,
}

/// 一次在途位置同步的凭证
pub(crate) struct MoveTicket {
    pub id: String,
    pub seq: u64,
    pub token: CancellationToken,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新的位置同步，同一记忆上的旧请求被取消
    pub fn begin_move(&self, id: &str) -> MoveTicket {
        let seq = {
            let mut next = lock(&self.next_ticket);
            *next += 1;
            *next
        };
        let token = CancellationToken::new();
        if let Some((_, previous)) = lock(&self.moves).insert(id.to_string(), (seq, token.clone()))
        {
            previous.cancel();
        }
        MoveTicket {
            id: id.to_string(),
            seq,
            token,
        }
    }

    /// 请求结束后注销；已被新请求替换时不做处理
    pub fn finish_move(&self, ticket: &MoveTicket) {
        let mut moves = lock(&self.moves);
        if moves.get(&ticket.id).is_some_and(|(seq, _)| *seq == ticket.seq) {
            moves.remove(&ticket.id);
        }
    }

    /// 取消该记忆的在途位置同步
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.moves).remove(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, (_, token)) in lock(&self.moves).drain() {
            token.cancel();
        }
        lock(&self.tombstones).clear();
    }

    #[cfg(test)]
    pub fn in_flight(&self, id: &str) -> bool {
        lock(&self.moves).contains_key(id)
    }

    pub fn bury(&self, temp_id: &str) {
        lock(&self.tombstones).insert(temp_id.to_string());
    }

    /// 取出墓碑，返回该临时 id 是否已被删除
    pub fn exhume(&self, temp_id: &str) -> bool {
        lock(&self.tombstones).remove(temp_id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_move_cancels_previous() {
        let registry = InflightRegistry::new();
        let first = registry.begin_move("1");
        let second = registry.begin_move("1");

        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());

        // 旧凭证注销不影响新请求
        registry.finish_move(&first);
        assert!(registry.in_flight("1"));
        registry.finish_move(&second);
        assert!(!registry.in_flight("1"));
    }

    #[test]
    fn test_cancel_is_per_memory() {
        let registry = InflightRegistry::new();
        let a = registry.begin_move("a");
        let b = registry.begin_move("b");
        assert!(registry.cancel("a"));
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert!(!registry.cancel("a"));
    }

    #[test]
    fn test_tombstones() {
        let registry = InflightRegistry::new();
        registry.bury("temp-1");
        assert!(registry.exhume("temp-1"));
        assert!(!registry.exhume("temp-1"));
    }
}
