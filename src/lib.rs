//! # linkauth
//!
//! 基于邮箱的无密码登录。
//!
//! ## 功能特性
//!
//! - **用户目录**: 从文件加载允许登录的邮箱及其激活状态
//! - **Token 派生**: `sha256(email ++ DDMMYYYY)`，可选 HMAC 密钥派生
//! - **登录链接**: 带标签的 JSON 记录，URL 安全 Base64 编码并整体签名，验证时重新计算 token
//! - **Token 存储**: 追加写入的文件存储，并发安全，原子重写
//! - **会话载体**: HMAC 签名的 Cookie，或进程内载体
//! - **链接投递**: 可插拔的投递接口，`smtp` feature 提供 SMTP 实现
//! - **配置**: 默认值、`linkauth.toml`、`.env` 与环境变量分层合并
//!
//! ## Features
//!
//! - `smtp` - 启用基于 lettre 的 SMTP 投递
//! - `full` - 启用所有功能
//!
//! ## 直接建立会话
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
//! service.request_login("a@b.com", &carrier).unwrap();
//! assert!(service.current_session(&carrier).is_some());
//!
//! // 未知用户
//! assert!(service.request_login("x@y.com", &MemoryCarrier::new()).is_err());
//! ```
//!
//! ## 邮件链接
//!
//! ```rust
//! use linkauth::{
//!     AuthConfig, AuthService, InMemoryDirectory, InMemoryTokenStore, LoginMode, MemoryCarrier,
//!     MemoryOutbox,
//! };
//! use std::sync::Arc;
//!
//! let outbox = Arc::new(MemoryOutbox::new());
//! let service = AuthService::new(
//!     AuthConfig::default().with_mode(LoginMode::EmailLink),
//!     Arc::new(InMemoryDirectory::new().with_user("a@b.com", true)),
//!     Arc::new(InMemoryTokenStore::new()),
//! )
//! .unwrap()
//! .with_delivery(outbox.clone());
//!
//! service.request_login("a@b.com", &MemoryCarrier::new()).unwrap();
//!
//! // 用户点击邮件中的链接
//! let link = outbox.last().unwrap().link;
//! let browser = MemoryCarrier::new();
//! assert!(service.handle_request(link.query(), &browser).is_protected());
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod random;
pub mod service;
pub mod session;
pub mod store;

pub use error::{Error, Result};

// ============================================================================
// 服务
// ============================================================================

pub use service::{AuthService, Landing, LoginAttempt, LoginOutcome, LoginState};

// ============================================================================
// 配置
// ============================================================================

pub use config::{AuthConfig, LoginMode, SmtpConfig};

// ============================================================================
// Token 与登录链接
// ============================================================================

pub use codec::{
    ExpiryDate, LinkSigner, LoginLinkPayload, TokenDeriver, compute_token, decode_login_link,
    encode_login_link, generate_expiry,
};

// ============================================================================
// 存储、目录与投递
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{LinkDelivery, MemoryOutbox, SentLink};
#[cfg(feature = "smtp")]
pub use delivery::SmtpDelivery;
pub use directory::{FileDirectory, InMemoryDirectory, User, UserDirectory};
pub use store::{FileTokenStore, InMemoryTokenStore, TokenRecord, TokenStore};

// ============================================================================
// 会话载体
// ============================================================================

pub use session::{CookieCarrier, MemoryCarrier, SessionCarrier};
