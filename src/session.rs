//! 登录会话
//!
//! [`SessionHandle`] 在构造时显式注入同步层与网关，所有组件共享同一份会话。
//! `logout()` 清空会话并通过 watch 通道通知订阅方。

use crate::model::UserProfile;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::info;

/// 缓存键前缀，完整键为 `memolink_data_<user_id>`
pub const CACHE_KEY_PREFIX: &str = "memolink_data";

/// 一次登录会话
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    /// 最近一次拉取的用户资料
    pub profile: Option<UserProfile>,
}

impl Session {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            profile: None,
        }
    }

    /// 从 JWT 的 payload 中取 `sub` 作为用户标识，解析失败时退化为 `"user"`
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let user_id = jwt_subject(&token).unwrap_or_else(|| "user".to_string());
        Self::new(token, user_id)
    }

    pub fn cache_key(&self) -> String {
        cache_key_for(&self.user_id)
    }
}

/// 用户对应的缓存键
pub fn cache_key_for(user_id: &str) -> String {
    format!("{}_{}", CACHE_KEY_PREFIX, user_id)
}

fn jwt_subject(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    match claims.get("sub")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 可共享的会话句柄
///
/// 订阅方通过 [`SessionHandle::subscribe`] 拿到当前用户 id 的变化（`None` 表示已登出）。
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<Session>>>,
    user_tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl SessionHandle {
    /// 未登录（离线）句柄
    pub fn anonymous() -> Self {
        let (user_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(RwLock::new(None)),
            user_tx: Arc::new(user_tx),
        }
    }

    pub fn with_session(session: Session) -> Self {
        let handle = Self::anonymous();
        handle.login(session);
        handle
    }

    pub fn login(&self, session: Session) {
        let user_id = session.user_id.clone();
        *self.write() = Some(session);
        info!(user_id = %user_id, "🔑 会话已建立");
        self.user_tx.send_replace(Some(user_id));
    }

    /// 清空会话并通知订阅方，返回被结束的会话
    pub fn logout(&self) -> Option<Session> {
        let ended = self.write().take();
        if let Some(session) = &ended {
            info!(user_id = %session.user_id, "🚪 会话已结束");
            self.user_tx.send_replace(None);
        }
        ended
    }

    pub fn current(&self) -> Option<Session> {
        self.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.read().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.token.clone())
    }

    pub fn cache_key(&self) -> Option<String> {
        self.read().as_ref().map(Session::cache_key)
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.read().as_ref().and_then(|s| s.profile.clone())
    }

    /// 更新当前会话的用户资料；未登录时忽略
    pub fn set_profile(&self, profile: UserProfile) {
        if let Some(session) = self.write().as_mut() {
            session.profile = Some(profile);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.user_tx.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
