//! 统一错误类型模块
//!
//! 提供 linkauth 库中所有操作的错误类型定义。

use std::fmt;

/// linkauth 库的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// 面向用户的通用拒绝信息
///
/// 所有认证失败都对外显示同一条信息，避免泄露账户是否存在。
pub const GENERIC_REJECTION: &str = "Invalid or inactive email.";

/// linkauth 库的错误类型
#[derive(Debug)]
pub enum Error {
    /// 用户目录相关错误
    Auth(AuthError),

    /// Token 验证错误
    Token(TokenError),

    /// 登录链接解码错误
    Decode(DecodeError),

    /// 存储错误
    Storage(StorageError),

    /// 链接投递错误
    Delivery(DeliveryError),

    /// 配置错误
    Config(ConfigError),

    /// 内部错误
    Internal(String),
}

impl Error {
    /// 创建一个内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建一个存储操作错误
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(StorageError::OperationFailed(msg.into()))
    }

    /// 返回可以安全展示给终端用户的信息
    ///
    /// 无论内部原因如何，都只返回通用拒绝信息。
    pub fn user_message(&self) -> &'static str {
        GENERIC_REJECTION
    }

    /// 是否属于"客户端提交了错误数据"一类的错误
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Token(_) | Error::Decode(_))
    }
}

/// 用户目录查询错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// 邮箱不在用户目录中
    UnknownUser(String),
    /// 用户存在但未激活
    InactiveUser(String),
}

/// Token 相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token 已过期
    Expired,
    /// 链接中的 token 与重新计算的值不一致
    Mismatch,
    /// 无效的字段值
    InvalidClaim(String),
}

/// 登录链接解码错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 完整性签名缺失或不匹配
    Signature(String),
    /// Base64 解码失败
    Encoding(String),
    /// 信封结构无效（非 JSON 或缺少字段）
    Envelope(String),
    /// 邮箱格式无效
    Email(String),
    /// Token 长度或字符集无效
    Token(String),
    /// 过期日期格式无效
    Expiry(String),
}

/// 存储相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 后端不可用（文件缺失、无法打开等）
    Unavailable(String),
    /// 操作失败
    OperationFailed(String),
}

/// 投递相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// 收件地址无效
    Address(String),
    /// 邮件构建失败
    Message(String),
    /// 传输层错误
    Transport(String),
}

/// 配置相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// 缺少必需的配置
    MissingRequired(String),
    /// 无效的配置值
    InvalidValue { key: String, message: String },
    /// 配置源加载失败
    Load(String),
}

// ============================================================================
// Display 实现
// ============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth(e) => write!(f, "Auth error: {}", e),
            Error::Token(e) => write!(f, "Token error: {}", e),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Delivery(e) => write!(f, "Delivery error: {}", e),
            Error::Config(e) => write!(f, "Config error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnknownUser(email) => write!(f, "unknown user: {}", email),
            AuthError::InactiveUser(email) => write!(f, "inactive user: {}", email),
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token has expired"),
            TokenError::Mismatch => write!(f, "token does not match its claims"),
            TokenError::InvalidClaim(msg) => write!(f, "invalid claim value: {}", msg),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Signature(msg) => write!(f, "invalid link signature: {}", msg),
            DecodeError::Encoding(msg) => write!(f, "invalid link encoding: {}", msg),
            DecodeError::Envelope(msg) => write!(f, "invalid link envelope: {}", msg),
            DecodeError::Email(email) => write!(f, "invalid email in link: {}", email),
            DecodeError::Token(msg) => write!(f, "invalid token in link: {}", msg),
            DecodeError::Expiry(value) => write!(f, "invalid expiry date: {}", value),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StorageError::OperationFailed(msg) => write!(f, "storage operation failed: {}", msg),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Address(msg) => write!(f, "invalid address: {}", msg),
            DeliveryError::Message(msg) => write!(f, "failed to build message: {}", msg),
            DeliveryError::Transport(msg) => write!(f, "transport failure: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(key) => {
                write!(f, "missing required configuration: {}", key)
            }
            ConfigError::InvalidValue { key, message } => {
                write!(f, "invalid configuration value for '{}': {}", key, message)
            }
            ConfigError::Load(msg) => write!(f, "failed to load configuration: {}", msg),
        }
    }
}

// ============================================================================
// std::error::Error 实现
// ============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Auth(e) => Some(e),
            Error::Token(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Storage(e) => Some(e),
            Error::Delivery(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Internal(_) => None,
        }
    }
}

impl std::error::Error for AuthError {}
impl std::error::Error for TokenError {}
impl std::error::Error for DecodeError {}
impl std::error::Error for StorageError {}
impl std::error::Error for DeliveryError {}
impl std::error::Error for ConfigError {}

// ============================================================================
// From 实现 - 方便错误转换
// ============================================================================

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        Error::Token(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<DeliveryError> for Error {
    fn from(err: DeliveryError) -> Self {
        Error::Delivery(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(ConfigError::Load(err.to_string()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::Storage(StorageError::Unavailable(err.to_string())),
            _ => Error::Storage(StorageError::OperationFailed(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Auth(AuthError::UnknownUser("x@y.com".to_string()));
        assert_eq!(err.to_string(), "Auth error: unknown user: x@y.com");
    }

    #[test]
    fn test_token_error_display() {
        let err = TokenError::Expired;
        assert_eq!(err.to_string(), "token has expired");
    }

    #[test]
    fn test_error_from_decode() {
        let err: Error = DecodeError::Expiry("99999999".to_string()).into();
        assert!(matches!(err, Error::Decode(DecodeError::Expiry(_))));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_io_not_found_maps_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "tokens.csv");
        let err: Error = io.into();
        assert!(matches!(err, Error::Storage(StorageError::Unavailable(_))));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_user_message_is_generic() {
        let unknown: Error = AuthError::UnknownUser("a@b.com".into()).into();
        let inactive: Error = AuthError::InactiveUser("a@b.com".into()).into();
        let mismatch: Error = TokenError::Mismatch.into();
        let expired: Error = TokenError::Expired.into();

        assert_eq!(unknown.user_message(), GENERIC_REJECTION);
        assert_eq!(inactive.user_message(), GENERIC_REJECTION);
        assert_eq!(mismatch.user_message(), GENERIC_REJECTION);
        assert_eq!(expired.user_message(), GENERIC_REJECTION);
    }
}
