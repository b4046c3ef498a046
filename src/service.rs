//! 认证服务
//!
//! 串起用户目录、token 存储、链接投递和会话载体，实现完整的无密码登录流程。
//!
//! ## 工作流程
//!
//! 1. 用户提交邮箱，[`AuthService::request_login`] 检查用户目录
//! 2. 计算过期日期和 token，追加到 token 存储
//! 3. 按 [`LoginMode`] 直接写入会话载体，或者把登录链接交给投递实现
//! 4. 用户点击链接，[`AuthService::verify_link`] 验证签名、检查过期、重新计算 token
//! 5. 之后的每个请求用 [`AuthService::validate_session`] 校验载体中的 token
//!
//! ## 示例
//!
//! ```rust
//! use linkauth::{AuthConfig, AuthService, InMemoryDirectory, InMemoryTokenStore, MemoryCarrier};
//! use std::sync::Arc;
//!
//! let directory = InMemoryDirectory::new().with_user("a@b.com", true);
//! let service = AuthService::new(
//!     AuthConfig::default(),
//!     Arc::new(directory),
//!     Arc::new(InMemoryTokenStore::new()),
//! )
//! .unwrap();
//!
//! let carrier = MemoryCarrier::new();
//! let outcome = service.request_login("a@b.com", &carrier).unwrap();
//! assert!(service.validate_session(outcome.token()));
//!
//! service.logout(&carrier).unwrap();
//! assert!(!service.validate_session(outcome.token()));
//! ```

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::codec::{
    ExpiryDate, LinkSigner, LoginLinkPayload, TokenDeriver, decode_login_link, encode_login_link,
    extract_link_param, generate_expiry, login_url,
};
use crate::config::{AuthConfig, LoginMode};
use crate::delivery::LinkDelivery;
use crate::directory::{FileDirectory, UserDirectory};
use crate::error::{ConfigError, Error, Result, TokenError};
use crate::random::constant_time_compare_str;
use crate::session::{CookieCarrier, SessionCarrier};
use crate::store::{FileTokenStore, TokenRecord, TokenStore};

/// 允许的签发时间时钟偏差
const MAX_ISSUE_SKEW_MINUTES: i64 = 5;

// ============================================================================
// 登录状态
// ============================================================================

/// 单次登录尝试的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// 已提交邮箱
    Requested,
    /// 已签发 token 并写入存储
    Issued,
    /// 登录链接已交给投递实现
    Delivered,
    /// 等待用户点击链接
    PendingVerification,
    /// 已验证，会话已建立
    Verified,
    /// 已过期
    Expired,
    /// 无效（解码失败、token 不匹配、用户不可用）
    Invalid,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::Requested => "requested",
            LoginState::Issued => "issued",
            LoginState::Delivered => "delivered",
            LoginState::PendingVerification => "pending_verification",
            LoginState::Verified => "verified",
            LoginState::Expired => "expired",
            LoginState::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// 登录尝试
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    /// 用户邮箱
    pub email: String,
    /// Token
    pub token: String,
    /// 过期日期
    pub expiry: ExpiryDate,
    /// 签发时间
    pub issued_at: DateTime<Utc>,
    /// 当前状态
    pub state: LoginState,
}

impl LoginAttempt {
    fn payload(&self) -> LoginLinkPayload {
        LoginLinkPayload {
            email: self.email.clone(),
            token: self.token.clone(),
            expiry: self.expiry,
            issued_at: self.issued_at,
        }
    }
}

/// [`AuthService::request_login`] 的结果
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// token 已写入会话载体
    SessionEstablished(LoginAttempt),
    /// 登录链接已投递
    LinkSent {
        /// 登录尝试
        attempt: LoginAttempt,
        /// 投递的链接
        link: Url,
    },
}

impl LoginOutcome {
    /// 登录尝试
    pub fn attempt(&self) -> &LoginAttempt {
        match self {
            LoginOutcome::SessionEstablished(attempt) => attempt,
            LoginOutcome::LinkSent { attempt, .. } => attempt,
        }
    }

    /// 签发的 token
    pub fn token(&self) -> &str {
        &self.attempt().token
    }
}

/// 一次请求的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing {
    /// 会话有效，可以展示受保护内容
    Protected {
        /// 会话 token
        token: String,
    },
    /// 展示登录表单
    LoginPrompt {
        /// 需要展示给用户的提示
        notice: Option<&'static str>,
    },
}

impl Landing {
    /// 是否已登录
    pub fn is_protected(&self) -> bool {
        matches!(self, Landing::Protected { .. })
    }
}

// ============================================================================
// 认证服务
// ============================================================================

/// 认证服务
pub struct AuthService {
    config: AuthConfig,
    base_url: Url,
    deriver: TokenDeriver,
    cookie_key: String,
    signer: LinkSigner,
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn TokenStore>,
    delivery: Option<Arc<dyn LinkDelivery>>,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// 使用给定的用户目录和 token 存储创建服务
    ///
    /// `cookie_key` 同时用于签名 Cookie 和登录链接；未配置时生成进程内的临时密钥，
    /// 重启后之前签发的 Cookie 和链接都会失效。
    pub fn new(
        config: AuthConfig,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;
        let deriver = config.token_deriver();
        let cookie_key = config.resolve_cookie_key()?;
        let signer = LinkSigner::new(&cookie_key);

        Ok(Self {
            config,
            base_url,
            deriver,
            cookie_key,
            signer,
            directory,
            store,
            delivery: None,
            clock: Arc::new(SystemClock),
        })
    }

    /// 按配置中的文件路径创建服务
    ///
    /// 启用 `smtp` feature 且 `mode = email_link` 时自动配置 SMTP 投递。
    pub fn from_config(config: AuthConfig) -> Result<Self> {
        let directory = FileDirectory::load(&config.users_file)?;
        let store = FileTokenStore::new(config.tokens_file.clone());

        #[cfg(feature = "smtp")]
        let delivery: Option<Arc<dyn LinkDelivery>> = if config.mode == LoginMode::EmailLink {
            Some(Arc::new(crate::delivery::SmtpDelivery::from_config(&config.smtp)?))
        } else {
            None
        };
        #[cfg(not(feature = "smtp"))]
        let delivery: Option<Arc<dyn LinkDelivery>> = None;

        let mut service = Self::new(config, Arc::new(directory), Arc::new(store))?;
        service.delivery = delivery;
        Ok(service)
    }

    /// 设置链接投递实现
    pub fn with_delivery(mut self, delivery: Arc<dyn LinkDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// 设置时间源
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 获取配置
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// 获取 token 存储
    pub fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    /// 按配置为一次请求构造 Cookie 载体
    ///
    /// 使用服务持有的签名密钥，未配置 `cookie_key` 时同一进程内的请求仍然共享同一个临时密钥。
    pub fn cookie_carrier(&self, cookie_header: Option<&str>) -> CookieCarrier {
        CookieCarrier::configured(&self.config, &self.cookie_key, cookie_header)
    }

    /// 请求登录
    ///
    /// 每次成功调用都会追加一条新记录，不会撤销同一用户之前的 token。
    ///
    /// # Errors
    ///
    /// - 用户不存在或未激活
    /// - `email_link` 模式下未配置投递实现
    /// - 写入存储或投递失败
    pub fn request_login(&self, email: &str, carrier: &dyn SessionCarrier) -> Result<LoginOutcome> {
        let email = email.trim();
        tracing::debug!(email = %email, state = %LoginState::Requested, "login requested");

        if let Err(e) = self.directory.require_active(email) {
            tracing::warn!(email = %email, error = %e, "login request rejected");
            return Err(e);
        }

        let delivery = match self.config.mode {
            LoginMode::ImmediateSession => None,
            LoginMode::EmailLink => Some(self.delivery.as_ref().ok_or_else(|| {
                Error::from(ConfigError::MissingRequired("link delivery".into()))
            })?),
        };

        let issued_at = self.clock.now();
        let expiry = generate_expiry(self.config.token_validity_days, issued_at)?;
        let token = self.deriver.derive(email, &expiry);

        self.store.append(&TokenRecord::new(email, token.clone(), expiry))?;

        let mut attempt = LoginAttempt {
            email: email.to_string(),
            token,
            expiry,
            issued_at,
            state: LoginState::Issued,
        };
        tracing::info!(email = %email, expiry = %expiry, state = %attempt.state, "token issued");

        let Some(delivery) = delivery else {
            carrier.set_token(&attempt.token);
            attempt.state = LoginState::Verified;
            tracing::info!(email = %email, state = %attempt.state, "session established");
            return Ok(LoginOutcome::SessionEstablished(attempt));
        };

        let link = self.login_link(&attempt)?;
        if let Err(e) = delivery.deliver(email, &link) {
            tracing::warn!(email = %email, error = %e, "login link delivery failed");
            return Err(e);
        }
        tracing::debug!(email = %email, state = %LoginState::Delivered, "login link delivered");

        attempt.state = LoginState::PendingVerification;
        Ok(LoginOutcome::LinkSent { attempt, link })
    }

    /// 构建登录尝试对应的完整链接
    pub fn login_link(&self, attempt: &LoginAttempt) -> Result<Url> {
        let encoded = encode_login_link(&attempt.payload(), &self.signer)?;
        Ok(login_url(&self.base_url, &self.config.link_param, &encoded))
    }

    /// 验证登录链接
    ///
    /// 先验证链接签名，再用同样的派生方式重新计算 token 并做常量时间比较。
    /// 成功后 token 被写入存储（已存在则不重复写入）并绑定到会话载体。
    ///
    /// # Errors
    ///
    /// - 签名无效或解码失败
    /// - 已过期
    /// - token 与 `(email, expiry)` 不匹配，或签发时间在未来
    /// - 用户不存在或已停用
    pub fn verify_link(&self, encoded: &str, carrier: &dyn SessionCarrier) -> Result<LoginAttempt> {
        let payload = decode_login_link(encoded, &self.signer).map_err(|e| {
            tracing::warn!(error = %e, state = %LoginState::Invalid, "rejected login link");
            Error::from(e)
        })?;

        let now = self.clock.now();
        let email = payload.email.as_str();

        if !payload.expiry.is_valid_at(now) {
            tracing::warn!(email = %email, expiry = %payload.expiry, state = %LoginState::Expired, "login link expired");
            return Err(TokenError::Expired.into());
        }

        let expected = self.deriver.derive(email, &payload.expiry);
        if !constant_time_compare_str(&expected, &payload.token) {
            tracing::warn!(email = %email, state = %LoginState::Invalid, "login link token mismatch");
            return Err(TokenError::Mismatch.into());
        }

        if payload.issued_at > now + Duration::minutes(MAX_ISSUE_SKEW_MINUTES) {
            tracing::warn!(email = %email, issued_at = %payload.issued_at, "login link issued in the future");
            return Err(TokenError::InvalidClaim("issued_at is in the future".into()).into());
        }

        if let Err(e) = self.directory.require_active(email) {
            tracing::warn!(email = %email, error = %e, state = %LoginState::Invalid, "login link for unavailable user");
            return Err(e);
        }

        let record = TokenRecord::new(email, payload.token.clone(), payload.expiry);
        let appended = self.store.append_if_absent(&record)?;
        carrier.set_token(&payload.token);

        tracing::info!(email = %email, appended, state = %LoginState::Verified, "login link verified");

        Ok(LoginAttempt {
            email: payload.email,
            token: payload.token,
            expiry: payload.expiry,
            issued_at: payload.issued_at,
            state: LoginState::Verified,
        })
    }

    /// 校验 token 是否对应一个有效会话
    ///
    /// 线性扫描存储。存储不可用时返回 `false`。
    pub fn validate_session(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }

        match self.store.find(token) {
            Ok(Some(record)) => record.is_valid_at(self.clock.now()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "token store unavailable, treating session as invalid");
                false
            }
        }
    }

    /// 载体中当前有效的 token
    pub fn current_session(&self, carrier: &dyn SessionCarrier) -> Option<String> {
        carrier
            .token()
            .filter(|token| self.validate_session(token))
    }

    /// 登出
    ///
    /// 删除存储中所有匹配载体 token 的记录，然后清除载体。重复调用是安全的。
    /// 返回删除的记录数。
    pub fn logout(&self, carrier: &dyn SessionCarrier) -> Result<usize> {
        let Some(token) = carrier.token() else {
            return Ok(0);
        };

        let removed = self.store.remove(&token);
        carrier.clear();

        let removed = removed?;
        tracing::info!(removed, "logged out");
        Ok(removed)
    }

    /// 不经过载体直接撤销 token
    pub fn revoke(&self, token: &str) -> Result<usize> {
        let removed = self.store.remove(token)?;
        tracing::info!(removed, "token revoked");
        Ok(removed)
    }

    /// 删除所有已过期的记录
    ///
    /// 建议定期调用以防止存储无限增长。
    pub fn compact(&self) -> Result<usize> {
        let removed = self.store.remove_expired(self.clock.now())?;
        tracing::info!(removed, "compacted token store");
        Ok(removed)
    }

    /// 处理一次页面请求
    ///
    /// - 查询字符串带有登录链接参数时先验证链接
    /// - 否则检查载体中的 token
    /// - 任何失败都回到登录表单，不会返回错误
    pub fn handle_request(&self, query: Option<&str>, carrier: &dyn SessionCarrier) -> Landing {
        if let Some(encoded) = query.and_then(|q| extract_link_param(q, &self.config.link_param)) {
            return match self.verify_link(&encoded, carrier) {
                Ok(attempt) => Landing::Protected {
                    token: attempt.token,
                },
                Err(e) => Landing::LoginPrompt {
                    notice: Some(e.user_message()),
                },
            };
        }

        match self.current_session(carrier) {
            Some(token) => Landing::Protected { token },
            None => Landing::LoginPrompt { notice: None },
        }
    }
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .field("deriver", &self.deriver)
            .field("has_delivery", &self.delivery.is_some())
            .finish_non_exhaustive()
    }
}
