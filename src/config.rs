//! 客户端配置加载
//!
//! 支持两种来源：
//!
//! - YAML 文件：[`ClientConfig::load`]
//! - 环境变量（自动读取 `.env`）：[`ClientConfig::from_env`]
//!
//! ```text
//! MEMOLINK_API_URL=http://localhost:8000
//! MEMOLINK_TIMEOUT_SECS=30
//! MEMOLINK_CACHE_PATH=~/.memolink/cache.json
//! MEMOLINK_CACHE_DEBOUNCE_MS=250
//! MEMOLINK_MEMORY_LIMIT=30
//! ```

use crate::error::{ConfigError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 分页大小，固定为 40
pub const PAGE_SIZE: usize = 40;

/// 非会员默认记忆条数上限
pub const DEFAULT_MEMORY_LIMIT: usize = 30;

const ENV_PREFIX: &str = "MEMOLINK_";

/// 同步客户端的运行配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// 后端根地址
    pub api_url: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 每页记忆条数
    pub page_size: usize,
    /// 缓存快照文件路径
    pub cache_path: String,
    /// 缓存写入的合并窗口（毫秒）
    pub cache_debounce_ms: u64,
    /// 非会员的默认条数上限：用户资料缺少 `memory_limit`，或尚未拉取到资料时套用
    pub default_memory_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            page_size: PAGE_SIZE,
            cache_path: "~/.memolink/cache.json".to_string(),
            cache_debounce_ms: 250,
            default_memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &str) -> Result<Self> {
        let file =
            std::fs::File::open(path).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let config: ClientConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// 从任意键值对构建，未出现的键保持默认值
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match suffix {
                "API_URL" => config.api_url = value,
                "TIMEOUT_SECS" => config.timeout_secs = parse_value(&key, &value)?,
                "CACHE_PATH" => config.cache_path = value,
                "CACHE_DEBOUNCE_MS" => config.cache_debounce_ms = parse_value(&key, &value)?,
                "MEMORY_LIMIT" => config.default_memory_limit = parse_value(&key, &value)?,
                // CLI 用到的登录态变量不属于客户端配置
                "TOKEN" => {}
                _ => return Err(ConfigError::UnknownKey(key).into()),
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size != PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                message: format!("page size is fixed at {}", PAGE_SIZE),
            }
            .into());
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_url".to_string(),
                message: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
