//! 配置
//!
//! [`AuthConfig`] 既可以用 `with_*` 方法直接构建，也可以通过 [`AuthConfig::load`]
//! 从多个来源分层加载：
//!
//! 1. 内置默认值
//! 2. `linkauth.toml`
//! 3. 旧版环境变量 `TOKEN_VALID_DAYS`、`COOKIE_PASSWORD`
//! 4. `LINKAUTH_` 前缀的环境变量（`__` 表示嵌套，如 `LINKAUTH_SMTP__SERVER`）
//!
//! 加载前会先读取当前目录下的 `.env` 文件（如果存在）。
//!
//! ```rust
//! use linkauth::config::{AuthConfig, LoginMode};
//!
//! let config = AuthConfig::new()
//!     .with_token_validity_days(3)
//!     .with_mode(LoginMode::EmailLink)
//!     .with_base_url("https://app.example.com/");
//! assert!(config.validate().is_ok());
//! ```

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::value::{Uncased, UncasedStr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::codec::TokenDeriver;
use crate::error::{ConfigError, Result};
use crate::random::generate_cookie_key;

/// 配置文件名
pub const CONFIG_FILE: &str = "linkauth.toml";

/// 环境变量前缀
pub const ENV_PREFIX: &str = "LINKAUTH_";

/// 登录成功后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// 直接把 token 写入会话载体
    #[default]
    ImmediateSession,
    /// 通过邮件发送登录链接
    EmailLink,
}

/// SMTP 配置
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// 服务器地址
    pub server: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub user: Option<String>,
    /// 密码
    pub password: Option<String>,
    /// 发件地址，缺省时使用 `user`
    pub from: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 587,
            user: None,
            password: None,
            from: None,
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .finish()
    }
}

/// 认证服务配置
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token 有效天数
    pub token_validity_days: u32,

    /// Cookie 签名密钥；未设置时每次启动随机生成
    pub cookie_key: Option<String>,

    /// Cookie 名称前缀
    pub cookie_prefix: String,

    /// 登录链接指向的地址
    pub base_url: String,

    /// 登录链接的查询参数名
    pub link_param: String,

    /// 用户目录文件
    pub users_file: PathBuf,

    /// Token 存储文件
    pub tokens_file: PathBuf,

    /// 登录方式
    pub mode: LoginMode,

    /// Token 派生密钥；未设置时使用无密钥摘要
    pub token_secret: Option<String>,

    /// SMTP 配置
    pub smtp: SmtpConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_validity_days: 7,
            cookie_key: None,
            cookie_prefix: "auth_".to_string(),
            base_url: "http://localhost:8501/".to_string(),
            link_param: "login".to_string(),
            users_file: PathBuf::from("users.csv"),
            tokens_file: PathBuf::from("tokens.csv"),
            mode: LoginMode::ImmediateSession,
            token_secret: None,
            smtp: SmtpConfig::default(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_validity_days", &self.token_validity_days)
            .field("cookie_key", &self.cookie_key.as_ref().map(|_| "<redacted>"))
            .field("cookie_prefix", &self.cookie_prefix)
            .field("base_url", &self.base_url)
            .field("link_param", &self.link_param)
            .field("users_file", &self.users_file)
            .field("tokens_file", &self.tokens_file)
            .field("mode", &self.mode)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("smtp", &self.smtp)
            .finish()
    }
}

impl AuthConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 token 有效天数
    pub fn with_token_validity_days(mut self, days: u32) -> Self {
        self.token_validity_days = days;
        self
    }

    /// 设置 Cookie 签名密钥
    pub fn with_cookie_key(mut self, key: impl Into<String>) -> Self {
        self.cookie_key = Some(key.into());
        self
    }

    /// 设置登录链接地址
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// 设置查询参数名
    pub fn with_link_param(mut self, param: impl Into<String>) -> Self {
        self.link_param = param.into();
        self
    }

    /// 设置用户目录和 token 存储文件
    pub fn with_files(mut self, users: impl Into<PathBuf>, tokens: impl Into<PathBuf>) -> Self {
        self.users_file = users.into();
        self.tokens_file = tokens.into();
        self
    }

    /// 设置登录方式
    pub fn with_mode(mut self, mode: LoginMode) -> Self {
        self.mode = mode;
        self
    }

    /// 设置 token 派生密钥
    pub fn with_token_secret(mut self, secret: impl Into<String>) -> Self {
        self.token_secret = Some(secret.into());
        self
    }

    /// 设置 SMTP 配置
    pub fn with_smtp(mut self, smtp: SmtpConfig) -> Self {
        self.smtp = smtp;
        self
    }

    /// 分层配置源
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AuthConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().filter_map(|key| legacy_env_key(key)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 从 `.env`、配置文件和环境变量加载
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_figment(Self::figment())
    }

    /// 从给定的 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        tracing::debug!(config = ?config, "configuration loaded");
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.token_validity_days == 0 {
            return Err(invalid("token_validity_days", "must be at least 1"));
        }

        if self.link_param.trim().is_empty() {
            return Err(invalid("link_param", "must not be empty"));
        }

        self.base_url()?;

        if self.cookie_key.as_deref().is_none_or(str::is_empty) {
            tracing::warn!("cookie_key not set; sessions will not survive a restart");
        }

        Ok(())
    }

    /// 解析后的 `base_url`
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|e| invalid("base_url", e.to_string()))
    }

    /// 有效的 Cookie 签名密钥
    ///
    /// 未配置时生成随机密钥并记录警告。
    pub fn resolve_cookie_key(&self) -> Result<String> {
        match &self.cookie_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => {
                tracing::warn!("no cookie_key configured, using an ephemeral key");
                generate_cookie_key()
            }
        }
    }

    /// 按配置选择 token 派生方式
    pub fn token_deriver(&self) -> TokenDeriver {
        match &self.token_secret {
            Some(secret) if !secret.is_empty() => TokenDeriver::keyed(secret.as_bytes()),
            _ => TokenDeriver::Digest,
        }
    }
}

/// 旧版环境变量名映射
fn legacy_env_key(key: &UncasedStr) -> Option<Uncased<'_>> {
    let key = key.as_str();
    if key.eq_ignore_ascii_case("TOKEN_VALID_DAYS") {
        Some(Uncased::from("token_validity_days"))
    } else if key.eq_ignore_ascii_case("COOKIE_PASSWORD") {
        Some(Uncased::from("cookie_key"))
    } else {
        None
    }
}

fn invalid(key: &str, message: impl Into<String>) -> crate::error::Error {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
    .into()
}
