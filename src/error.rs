use std::fmt;

/// memolink 的统一错误类型
#[derive(Debug)]
pub enum MemolinkError {
    /// 远端网关错误
    Gateway(GatewayError),
    /// 本地缓存错误
    Cache(CacheError),
    /// 同步层前置条件错误
    Sync(SyncError),
    /// 配置错误
    Config(ConfigError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// 远端网关错误（传输失败、非 2xx、校验失败）
#[derive(Debug)]
pub enum GatewayError {
    /// 网络请求失败（超时、连接被拒）
    NetworkError(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 登录态失效（401）
    Unauthorized,
    /// 响应格式无效
    InvalidResponse(String),
}

/// 缓存快照读写错误
#[derive(Debug)]
pub enum CacheError {
    IoError(String),
    SerializationError(String),
}

/// 同步层本地前置条件错误
#[derive(Debug)]
pub enum SyncError {
    /// 集合中不存在该 id
    NotFound(String),
    /// 非会员用户达到记忆条数上限
    QuotaExceeded { limit: usize },
    /// 实体仍处于临时 id 阶段，服务端尚无法寻址
    Pending(String),
    /// 需要登录态的操作在离线模式下调用
    NoSession,
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 未识别的环境变量
    UnknownKey(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
}

impl MemolinkError {
    /// 是否属于传输层失败（超时、连接失败、非 2xx）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MemolinkError::Gateway(
                GatewayError::NetworkError(_) | GatewayError::ApiError { .. }
            )
        )
    }
}

impl fmt::Display for MemolinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemolinkError::Gateway(e) => write!(f, "Gateway Error: {}", e),
            MemolinkError::Cache(e) => write!(f, "Cache Error: {}", e),
            MemolinkError::Sync(e) => write!(f, "Sync Error: {}", e),
            MemolinkError::Config(e) => write!(f, "Config Error: {}", e),
            MemolinkError::Io(e) => write!(f, "IO Error: {}", e),
            MemolinkError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            GatewayError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            GatewayError::Unauthorized => write!(f, "Token expired or invalid"),
            GatewayError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::IoError(msg) => write!(f, "Cache IO error: {}", msg),
            CacheError::SerializationError(msg) => {
                write!(f, "Cache serialization error: {}", msg)
            }
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NotFound(id) => write!(f, "'{}' not found", id),
            SyncError::QuotaExceeded { limit } => {
                write!(f, "Memory limit reached ({}), upgrade to premium", limit)
            }
            SyncError::Pending(id) => write!(f, "'{}' has not been saved yet", id),
            SyncError::NoSession => write!(f, "No active session"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::UnknownKey(key) => write!(f, "Unknown config key: {}", key),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for MemolinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemolinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for GatewayError {}
impl std::error::Error for CacheError {}
impl std::error::Error for SyncError {}
impl std::error::Error for ConfigError {}

// From 转换实现
impl From<std::io::Error> for MemolinkError {
    fn from(err: std::io::Error) -> Self {
        MemolinkError::Io(err)
    }
}

impl From<reqwest::Error> for MemolinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MemolinkError::Gateway(GatewayError::NetworkError("Request timeout".to_string()))
        } else if err.is_connect() {
            MemolinkError::Gateway(GatewayError::NetworkError(format!(
                "Connection failed: {}",
                err
            )))
        } else if err.is_decode() {
            MemolinkError::Gateway(GatewayError::InvalidResponse(err.to_string()))
        } else {
            MemolinkError::Gateway(GatewayError::NetworkError(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for MemolinkError {
    fn from(err: serde_json::Error) -> Self {
        MemolinkError::Cache(CacheError::SerializationError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for MemolinkError {
    fn from(err: serde_yaml::Error) -> Self {
        MemolinkError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<GatewayError> for MemolinkError {
    fn from(err: GatewayError) -> Self {
        MemolinkError::Gateway(err)
    }
}

impl From<CacheError> for MemolinkError {
    fn from(err: CacheError) -> Self {
        MemolinkError::Cache(err)
    }
}

impl From<SyncError> for MemolinkError {
    fn from(err: SyncError) -> Self {
        MemolinkError::Sync(err)
    }
}

impl From<ConfigError> for MemolinkError {
    fn from(err: ConfigError) -> Self {
        MemolinkError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, MemolinkError>;
