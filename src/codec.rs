//! Token 编解码模块
//!
//! 负责三件事：
//!
//! - **过期日期**: 以 `DDMMYYYY` 八位数字表示的日历日期
//! - **Token 派生**: 由 `(email, expiry)` 确定性地计算 64 位十六进制摘要
//! - **登录链接**: 把 `{email, token, expiry, issued_at}` 打包成一个带签名的不透明字符串
//!
//! ## 示例
//!
//! ```rust
//! use linkauth::codec::{
//!     compute_token, decode_login_link, encode_login_link, ExpiryDate, LinkSigner, LoginLinkPayload,
//! };
//! use chrono::Utc;
//!
//! let signer = LinkSigner::new(b"server-side-link-key");
//! let expiry = ExpiryDate::parse("08032025").unwrap();
//! let token = compute_token("a@b.com", &expiry);
//! assert_eq!(token.len(), 64);
//!
//! let payload = LoginLinkPayload {
//!     email: "a@b.com".to_string(),
//!     token,
//!     expiry,
//!     issued_at: Utc::now(),
//! };
//! let encoded = encode_login_link(&payload, &signer).unwrap();
//! assert_eq!(decode_login_link(&encoded, &signer).unwrap(), payload);
//!
//! // 其他密钥签名的链接被拒绝
//! assert!(decode_login_link(&encoded, &LinkSigner::new(b"another-key")).is_err());
//! ```
//!
//! ## 安全说明
//!
//! 默认的派生方式没有任何服务端密钥，知道邮箱和有效期的人都能算出 token。
//! 设置 `token_secret` 后改用 HMAC-SHA256。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::error::{DecodeError, Error, Result};
use crate::random::hex_encode;

type HmacSha256 = Hmac<Sha256>;

/// Token 的十六进制长度（SHA-256）
pub const TOKEN_LENGTH: usize = 64;

/// 过期日期格式
const EXPIRY_FORMAT: &str = "%d%m%Y";

// ============================================================================
// 过期日期
// ============================================================================

/// Token 过期日期
///
/// 有效期截止到该日期 00:00:00 UTC（含）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpiryDate(NaiveDate);

impl ExpiryDate {
    /// 从日历日期创建
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// 解析 `DDMMYYYY` 格式
    ///
    /// 必须是恰好 8 个 ASCII 数字且构成真实存在的日期。
    pub fn parse(value: &str) -> std::result::Result<Self, DecodeError> {
        if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::Expiry(value.to_string()));
        }

        NaiveDate::parse_from_str(value, EXPIRY_FORMAT)
            .map(Self)
            .map_err(|_| DecodeError::Expiry(value.to_string()))
    }

    /// 日历日期
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// 最后有效时刻
    pub fn deadline(&self) -> DateTime<Utc> {
        self.0.and_time(NaiveTime::MIN).and_utc()
    }

    /// 在 `now` 时刻是否仍然有效
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.deadline()
    }
}

impl fmt::Display for ExpiryDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(EXPIRY_FORMAT))
    }
}

/// 计算过期日期：`now + valid_days`，只保留日期部分
pub fn generate_expiry(valid_days: u32, now: DateTime<Utc>) -> Result<ExpiryDate> {
    now.checked_add_signed(Duration::days(i64::from(valid_days)))
        .map(|at| ExpiryDate(at.date_naive()))
        .ok_or_else(|| Error::internal("expiry date out of range"))
}

// ============================================================================
// Token 派生
// ============================================================================

/// Token 派生方式
#[derive(Clone, Default)]
pub enum TokenDeriver {
    /// `sha256(email ++ expiry)`
    #[default]
    Digest,
    /// `HMAC-SHA256(secret, email ++ expiry)`
    Keyed(Vec<u8>),
}

impl TokenDeriver {
    /// 使用服务端密钥
    pub fn keyed(secret: impl AsRef<[u8]>) -> Self {
        TokenDeriver::Keyed(secret.as_ref().to_vec())
    }

    /// 派生 token
    pub fn derive(&self, email: &str, expiry: &ExpiryDate) -> String {
        let expiry = expiry.to_string();
        match self {
            TokenDeriver::Digest => {
                let mut hasher = Sha256::new();
                hasher.update(email.as_bytes());
                hasher.update(expiry.as_bytes());
                hex_encode(&hasher.finalize())
            }
            TokenDeriver::Keyed(secret) => {
                let mut mac =
                    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
                mac.update(email.as_bytes());
                mac.update(expiry.as_bytes());
                hex_encode(&mac.finalize().into_bytes())
            }
        }
    }
}

impl fmt::Debug for TokenDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenDeriver::Digest => write!(f, "TokenDeriver::Digest"),
            TokenDeriver::Keyed(_) => write!(f, "TokenDeriver::Keyed(<redacted>)"),
        }
    }
}

/// 使用默认派生方式计算 token
pub fn compute_token(email: &str, expiry: &ExpiryDate) -> String {
    TokenDeriver::Digest.derive(email, expiry)
}

/// 检查字符串是否是合法的 token 形态（64 位小写十六进制）
pub fn is_token_shaped(value: &str) -> bool {
    value.len() == TOKEN_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// ============================================================================
// 登录链接
// ============================================================================

/// 登录链接携带的数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginLinkPayload {
    /// 用户邮箱
    pub email: String,
    /// Token
    pub token: String,
    /// 过期日期
    pub expiry: ExpiryDate,
    /// 签发时间
    pub issued_at: DateTime<Utc>,
}

/// 线上格式
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    email: String,
    token: String,
    expiry: String,
    iat: DateTime<Utc>,
}

/// 签名分隔符
const SIGNATURE_SEPARATOR: char = '.';

/// 登录链接签名的域分隔前缀，与 Cookie 签名区分开
const LINK_SIGNATURE_CONTEXT: &[u8] = b"linkauth/login-link/v1\0";

/// 登录链接签名器
///
/// 对编码后的整个信封计算 HMAC-SHA256，链接格式为 `base64(json).base64(signature)`。
/// 解码时先验证签名，签名不通过的链接不会读取任何字段。
#[derive(Clone)]
pub struct LinkSigner {
    key: Vec<u8>,
}

impl LinkSigner {
    /// 使用服务端密钥创建
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self, body: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(LINK_SIGNATURE_CONTEXT);
        mac.update(body.as_bytes());
        mac
    }

    /// 为编码后的信封追加签名
    pub fn sign(&self, body: &str) -> String {
        let signature = self.mac(body).finalize().into_bytes();
        format!(
            "{}{}{}",
            body,
            SIGNATURE_SEPARATOR,
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// 验证签名并返回信封部分
    pub fn verify<'a>(&self, signed: &'a str) -> std::result::Result<&'a str, DecodeError> {
        let Some((body, signature)) = signed.rsplit_once(SIGNATURE_SEPARATOR) else {
            return Err(DecodeError::Signature("missing signature".into()));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| DecodeError::Signature(e.to_string()))?;

        self.mac(body)
            .verify_slice(&signature)
            .map_err(|_| DecodeError::Signature("signature mismatch".into()))?;

        Ok(body)
    }
}

impl fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LinkSigner(<redacted>)")
    }
}

/// 编码登录链接
///
/// 字段以带标签的 JSON 记录序列化后做 URL 安全 Base64（无填充）编码，再由
/// `signer` 签名。
pub fn encode_login_link(payload: &LoginLinkPayload, signer: &LinkSigner) -> Result<String> {
    let envelope = Envelope {
        email: payload.email.clone(),
        token: payload.token.clone(),
        expiry: payload.expiry.to_string(),
        iat: payload.issued_at,
    };

    let json = serde_json::to_vec(&envelope)
        .map_err(|e| Error::internal(format!("failed to serialize login link: {}", e)))?;

    Ok(signer.sign(&URL_SAFE_NO_PAD.encode(json)))
}

/// 解码登录链接
///
/// 先验证签名，再解析信封。任何畸形输入都返回 [`DecodeError`]，不会 panic。
pub fn decode_login_link(
    encoded: &str,
    signer: &LinkSigner,
) -> std::result::Result<LoginLinkPayload, DecodeError> {
    let body = signer.verify(encoded.trim())?;

    let bytes = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| DecodeError::Encoding(e.to_string()))?;

    let envelope: Envelope =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Envelope(e.to_string()))?;

    if !is_plausible_email(&envelope.email) {
        return Err(DecodeError::Email(envelope.email));
    }

    if !is_token_shaped(&envelope.token) {
        return Err(DecodeError::Token(format!(
            "expected {} hex characters, got {:?}",
            TOKEN_LENGTH, envelope.token
        )));
    }

    let expiry = ExpiryDate::parse(&envelope.expiry)?;

    Ok(LoginLinkPayload {
        email: envelope.email,
        token: envelope.token,
        expiry,
        issued_at: envelope.iat,
    })
}

/// `local@domain.tld` 形态检查
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };

    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// 构建完整的登录 URL
///
/// 在 `base` 上追加一个查询参数 `param=<encoded>`。
pub fn login_url(base: &Url, param: &str, encoded: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair(param, encoded);
    url
}

/// 从查询字符串中取出登录链接参数
///
/// ```rust
/// use linkauth::codec::extract_link_param;
///
/// assert_eq!(extract_link_param("?login=abc&x=1", "login").as_deref(), Some("abc"));
/// assert_eq!(extract_link_param("x=1", "login"), None);
/// ```
pub fn extract_link_param(query: &str, param: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == param && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
