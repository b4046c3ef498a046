//! 会话载体
//!
//! 客户端只保存 token 本身，每次请求时带回。服务端除 token 存储中的记录外
//! 没有任何会话对象。
//!
//! - [`MemoryCarrier`]: 进程内载体，用于测试和非 HTTP 场景
//! - [`CookieCarrier`]: HMAC-SHA256 签名的 Cookie
//!
//! ## Cookie 示例
//!
//! ```rust
//! use linkauth::session::{CookieCarrier, SessionCarrier};
//!
//! let key = b"my-secret-key-at-least-32-bytes!";
//!
//! // 登录成功后写入 token
//! let outgoing = CookieCarrier::new("auth_", key);
//! outgoing.set_token("abc123");
//! let headers = outgoing.take_set_cookie_headers();
//! assert!(headers[0].starts_with("auth_token="));
//!
//! // 下一个请求带回 Cookie
//! let cookie_pair = headers[0].split(';').next().unwrap();
//! let incoming = CookieCarrier::from_request("auth_", key, Some(cookie_pair));
//! assert_eq!(incoming.token().as_deref(), Some("abc123"));
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::error::{ConfigError, Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// 签名分隔符
const SIGNATURE_SEPARATOR: &str = ".";

/// Cookie 名称（不含前缀）
pub const TOKEN_COOKIE: &str = "token";

// ============================================================================
// 载体接口
// ============================================================================

/// 会话载体接口
///
/// 方法都只需要 `&self`，实现者自行处理内部可变性。
pub trait SessionCarrier: Send + Sync {
    /// 当前携带的 token
    fn token(&self) -> Option<String>;

    /// 写入 token
    fn set_token(&self, token: &str);

    /// 清除 token
    fn clear(&self);
}

/// 进程内载体
#[derive(Debug, Default)]
pub struct MemoryCarrier {
    token: RwLock<Option<String>>,
}

impl MemoryCarrier {
    /// 创建空载体
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建已携带 token 的载体
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl SessionCarrier for MemoryCarrier {
    fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_token(&self, token: &str) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

// ============================================================================
// Cookie
// ============================================================================

/// SameSite Cookie 属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    /// 严格模式：Cookie 只在同站请求时发送
    Strict,
    /// 宽松模式：允许顶级导航的跨站请求（邮件中的登录链接属于此类）
    #[default]
    Lax,
    /// 无限制（需要 Secure 属性）
    None,
}

impl std::fmt::Display for SameSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// 安全 Cookie 结构
#[derive(Debug, Clone)]
pub struct SecureCookie {
    /// Cookie 名称
    pub name: String,
    /// Cookie 值
    pub value: String,
    /// HttpOnly 属性
    pub http_only: bool,
    /// Secure 属性
    pub secure: bool,
    /// SameSite 属性
    pub same_site: SameSite,
    /// Max-Age 属性
    pub max_age: Option<Duration>,
    /// Path 属性
    pub path: Option<String>,
}

impl SecureCookie {
    /// 创建新的 Cookie
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            http_only: false,
            secure: false,
            same_site: SameSite::Lax,
            max_age: None,
            path: None,
        }
    }

    /// 会话 Cookie 默认值：HttpOnly、Secure、SameSite=Lax、Path=/
    pub fn session(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value)
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .path("/")
    }

    /// 设置 HttpOnly 属性
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// 设置 Secure 属性
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// 设置 SameSite 属性
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// 设置 Max-Age 属性
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// 设置 Path 属性
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 对值进行签名
    pub fn signed(mut self, secret: &[u8]) -> Self {
        self.value = sign_cookie(&self.value, secret);
        self
    }

    /// 生成 Set-Cookie 头值
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];

        if self.http_only {
            parts.push("HttpOnly".to_string());
        }

        if self.secure {
            parts.push("Secure".to_string());
        }

        parts.push(format!("SameSite={}", self.same_site));

        if let Some(ref max_age) = self.max_age {
            parts.push(format!("Max-Age={}", max_age.as_secs()));
        }

        if let Some(ref path) = self.path {
            parts.push(format!("Path={}", path));
        }

        parts.join("; ")
    }
}

/// 签名 Cookie 值
///
/// 返回格式为 `base64(value).base64(signature)`
pub fn sign_cookie(value: &str, secret: &[u8]) -> String {
    let encoded_value = URL_SAFE_NO_PAD.encode(value.as_bytes());

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(encoded_value.as_bytes());
    let signature = mac.finalize().into_bytes();
    let encoded_signature = URL_SAFE_NO_PAD.encode(signature);

    format!(
        "{}{}{}",
        encoded_value, SIGNATURE_SEPARATOR, encoded_signature
    )
}

/// 验证签名的 Cookie 值并返回原始值
pub fn verify_cookie(signed_value: &str, secret: &[u8]) -> Result<String> {
    let Some((encoded_value, encoded_signature)) = signed_value.rsplit_once(SIGNATURE_SEPARATOR)
    else {
        return Err(Error::internal("invalid signed cookie format"));
    };

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(encoded_value.as_bytes());

    let expected_signature = URL_SAFE_NO_PAD
        .decode(encoded_signature)
        .map_err(|_| Error::internal("invalid cookie signature encoding"))?;

    mac.verify_slice(&expected_signature)
        .map_err(|_| Error::internal("cookie signature verification failed"))?;

    let value_bytes = URL_SAFE_NO_PAD
        .decode(encoded_value)
        .map_err(|_| Error::internal("invalid cookie value encoding"))?;

    String::from_utf8(value_bytes).map_err(|_| Error::internal("invalid UTF-8 in cookie value"))
}

/// 创建删除 Cookie 的头值
pub fn delete_cookie_header(name: &str, path: Option<&str>) -> String {
    let mut parts = vec![
        format!("{}=", name),
        "Max-Age=0".to_string(),
        "Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
    ];

    if let Some(p) = path {
        parts.push(format!("Path={}", p));
    }

    parts.join("; ")
}

/// 从请求的 `Cookie` 头中取出指定名称的值
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim())
    })
}

/// 基于签名 Cookie 的会话载体
///
/// 每个请求构造一个实例：读取请求中的 Cookie，处理结束后用
/// [`CookieCarrier::take_set_cookie_headers`] 取出需要写回的 `Set-Cookie` 头。
pub struct CookieCarrier {
    name: String,
    key: Vec<u8>,
    max_age: Option<Duration>,
    secure: bool,
    current: RwLock<Option<String>>,
    outgoing: RwLock<Vec<String>>,
}

impl CookieCarrier {
    /// 创建空载体
    pub fn new(prefix: &str, key: impl AsRef<[u8]>) -> Self {
        Self {
            name: format!("{}{}", prefix, TOKEN_COOKIE),
            key: key.as_ref().to_vec(),
            max_age: None,
            secure: true,
            current: RwLock::new(None),
            outgoing: RwLock::new(Vec::new()),
        }
    }

    /// 从请求的 `Cookie` 头构造
    ///
    /// 签名无效的 Cookie 视为不存在。
    pub fn from_request(prefix: &str, key: impl AsRef<[u8]>, cookie_header: Option<&str>) -> Self {
        let carrier = Self::new(prefix, key);

        let token = cookie_header
            .and_then(|header| find_cookie(header, &carrier.name))
            .and_then(|signed| match verify_cookie(signed, &carrier.key) {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::debug!(cookie = %carrier.name, error = %e, "ignoring unverifiable cookie");
                    None
                }
            });

        *carrier.current.write().unwrap_or_else(|e| e.into_inner()) = token;
        carrier
    }

    /// 按配置从请求构造
    ///
    /// 使用 `cookie_prefix` 和 `cookie_key`，Max-Age 等于 token 有效期，
    /// `base_url` 为 https 时设置 Secure。要求显式配置 `cookie_key`，
    /// 否则每个请求会得到不同的临时密钥。
    pub fn from_config(config: &AuthConfig, cookie_header: Option<&str>) -> Result<Self> {
        let key = config
            .cookie_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired("cookie_key".into()))?;
        Ok(Self::configured(config, key, cookie_header))
    }

    pub(crate) fn configured(config: &AuthConfig, key: &str, cookie_header: Option<&str>) -> Self {
        let secure = config
            .base_url()
            .map(|url| url.scheme() == "https")
            .unwrap_or(true);
        let max_age = Duration::from_secs(u64::from(config.token_validity_days) * 24 * 60 * 60);

        Self::from_request(&config.cookie_prefix, key, cookie_header)
            .with_secure(secure)
            .with_max_age(max_age)
    }

    /// 设置 Max-Age
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// 设置 Secure 属性（本地 HTTP 调试时关闭）
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Cookie 名称
    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    /// 取出待写回的 `Set-Cookie` 头
    pub fn take_set_cookie_headers(&self) -> Vec<String> {
        std::mem::take(&mut *self.outgoing.write().unwrap_or_else(|e| e.into_inner()))
    }

    fn push_header(&self, header: String) {
        self.outgoing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(header);
    }
}

impl std::fmt::Debug for CookieCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCarrier")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionCarrier for CookieCarrier {
    fn token(&self) -> Option<String> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_token(&self, token: &str) {
        let mut cookie = SecureCookie::session(&self.name, token)
            .secure(self.secure)
            .signed(&self.key);
        if let Some(max_age) = self.max_age {
            cookie = cookie.max_age(max_age);
        }

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        self.push_header(cookie.to_header_value());
    }

    fn clear(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.push_header(delete_cookie_header(&self.name, Some("/")));
    }
}
