//! 登录链接投递
//!
//! 本模块只定义投递接口和两个实现：
//!
//! - [`MemoryOutbox`]: 记录所有投递，供测试和本地调试使用
//! - `SmtpDelivery`: 通过 SMTP 发送邮件（需要 `smtp` feature）

use std::sync::RwLock;
use url::Url;

use crate::error::{DeliveryError, Result};

/// 投递接口
pub trait LinkDelivery: Send + Sync {
    /// 把登录链接发送给 `email`
    fn deliver(&self, email: &str, link: &Url) -> Result<()>;
}

/// 一次投递记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLink {
    /// 收件人
    pub email: String,
    /// 登录链接
    pub link: Url,
}

/// 内存发件箱
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    sent: RwLock<Vec<SentLink>>,
    fail: bool,
}

impl MemoryOutbox {
    /// 创建空发件箱
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次投递都失败的发件箱
    pub fn failing() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            fail: true,
        }
    }

    /// 已投递的记录
    pub fn sent(&self) -> Vec<SentLink> {
        self.sent.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 最近一次投递
    pub fn last(&self) -> Option<SentLink> {
        self.sent
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

impl LinkDelivery for MemoryOutbox {
    fn deliver(&self, email: &str, link: &Url) -> Result<()> {
        if self.fail {
            return Err(DeliveryError::Transport("outbox configured to fail".into()).into());
        }

        self.sent
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentLink {
                email: email.to_string(),
                link: link.clone(),
            });
        Ok(())
    }
}

#[cfg(feature = "smtp")]
pub use smtp::SmtpDelivery;

#[cfg(feature = "smtp")]
mod smtp {
    use lettre::message::{Mailbox, header::ContentType};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};
    use url::Url;

    use super::LinkDelivery;
    use crate::config::SmtpConfig;
    use crate::error::{ConfigError, DeliveryError, Result};

    /// SMTP 投递
    pub struct SmtpDelivery {
        transport: SmtpTransport,
        from: Mailbox,
        subject: String,
    }

    impl SmtpDelivery {
        /// 根据 SMTP 配置创建
        ///
        /// 使用 STARTTLS。不会立即建立连接。
        pub fn from_config(smtp: &SmtpConfig) -> Result<Self> {
            if smtp.server.is_empty() {
                return Err(ConfigError::MissingRequired("smtp.server".into()).into());
            }

            let from = smtp
                .from
                .as_ref()
                .or(smtp.user.as_ref())
                .ok_or_else(|| ConfigError::MissingRequired("smtp.from".into()))?;
            let from: Mailbox = from
                .parse()
                .map_err(|e: lettre::address::AddressError| DeliveryError::Address(e.to_string()))?;

            let mut builder = SmtpTransport::starttls_relay(&smtp.server)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?
                .port(smtp.port);

            if let (Some(user), Some(password)) = (&smtp.user, &smtp.password) {
                builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
            }

            tracing::info!(server = %smtp.server, port = smtp.port, "created SMTP transport");

            Ok(Self {
                transport: builder.build(),
                from,
                subject: "Your login link".to_string(),
            })
        }

        /// 设置邮件主题
        pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
            self.subject = subject.into();
            self
        }

        pub(crate) fn build_message(&self, email: &str, link: &Url) -> Result<Message> {
            let to: Mailbox = email
                .parse()
                .map_err(|e: lettre::address::AddressError| DeliveryError::Address(e.to_string()))?;

            let body = format!(
                "Click the link below to sign in:\n\n{}\n\nIf you did not request this email you can ignore it.\n",
                link
            );

            Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(self.subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(body)
                .map_err(|e| DeliveryError::Message(e.to_string()).into())
        }
    }

    impl LinkDelivery for SmtpDelivery {
        fn deliver(&self, email: &str, link: &Url) -> Result<()> {
            let message = self.build_message(email, link)?;
            self.transport
                .send(&message)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
            tracing::info!(email = %email, "login link sent");
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn config() -> SmtpConfig {
            SmtpConfig {
                server: "smtp.example.com".into(),
                user: Some("noreply@example.com".into()),
                password: Some("pw".into()),
                ..SmtpConfig::default()
            }
        }

        #[test]
        fn test_from_config_requires_server() {
            assert!(SmtpDelivery::from_config(&SmtpConfig::default()).is_err());
        }

        #[test]
        fn test_build_message() {
            let delivery = SmtpDelivery::from_config(&config()).unwrap();
            let link = Url::parse("https://app.example.com/?login=abc").unwrap();

            let message = delivery.build_message("a@b.com", &link).unwrap();
            let raw = String::from_utf8(message.formatted()).unwrap();
            assert!(raw.contains("To: a@b.com"));
            assert!(raw.contains("https://app.example.com/?login=abc"));
        }

        #[test]
        fn test_build_message_rejects_bad_address() {
            let delivery = SmtpDelivery::from_config(&config()).unwrap();
            let link = Url::parse("https://app.example.com/").unwrap();
            assert!(delivery.build_message("not an address", &link).is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_memory_outbox_records() {
        let outbox = MemoryOutbox::new();
        let link = Url::parse("https://app.example.com/?login=x").unwrap();

        outbox.deliver("a@b.com", &link).unwrap();
        assert_eq!(outbox.sent().len(), 1);
        assert_eq!(outbox.last().unwrap().email, "a@b.com");
        assert_eq!(outbox.last().unwrap().link, link);
    }

    #[test]
    fn test_failing_outbox() {
        let outbox = MemoryOutbox::failing();
        let link = Url::parse("https://app.example.com/").unwrap();

        assert!(matches!(
            outbox.deliver("a@b.com", &link),
            Err(Error::Delivery(DeliveryError::Transport(_)))
        ));
        assert!(outbox.sent().is_empty());
    }
}
