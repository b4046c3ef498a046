//! 登录流程集成测试
//!
//! 覆盖直接建立会话和邮件链接两种模式下的完整流程。

use chrono::Duration;
use linkauth::error::{AuthError, DecodeError, TokenError};
use linkauth::codec::LinkSigner;
use linkauth::{
    AuthConfig, AuthService, Clock, Error, InMemoryDirectory, InMemoryTokenStore, Landing, LoginMode,
    LoginOutcome, LoginState, ManualClock, MemoryCarrier, MemoryOutbox, SessionCarrier,
    TokenStore, compute_token,
};
use std::sync::Arc;

const SERVER_KEY: &str = "integration-server-key";

fn directory() -> Arc<InMemoryDirectory> {
    Arc::new(
        InMemoryDirectory::parse("email,active\na@b.com,1\nc@d.com,1\noff@b.com,0\n"),
    )
}

fn service(mode: LoginMode) -> (AuthService, Arc<MemoryOutbox>, Arc<ManualClock>) {
    let outbox = Arc::new(MemoryOutbox::new());
    let clock = Arc::new(ManualClock::starting_now());
    let config = AuthConfig::default()
        .with_mode(mode)
        .with_cookie_key(SERVER_KEY)
        .with_base_url("https://app.example.com/welcome");

    let service = AuthService::new(config, directory(), Arc::new(InMemoryTokenStore::new()))
        .unwrap()
        .with_delivery(outbox.clone())
        .with_clock(clock.clone());

    (service, outbox, clock)
}

// ============================================================================
// 直接建立会话
// ============================================================================

/// 有效用户登录后会话立即可用，8 天后失效
#[test]
fn test_immediate_session_lifecycle() {
    let (service, outbox, clock) = service(LoginMode::ImmediateSession);
    let carrier = MemoryCarrier::new();

    let outcome = service.request_login("a@b.com", &carrier).unwrap();
    assert!(matches!(outcome, LoginOutcome::SessionEstablished(_)));
    assert_eq!(
        outcome.token(),
        compute_token("a@b.com", &outcome.attempt().expiry)
    );
    assert!(outbox.sent().is_empty());

    assert!(service.handle_request(None, &carrier).is_protected());

    clock.advance(Duration::days(8));
    assert!(!service.validate_session(outcome.token()));
    assert_eq!(
        service.handle_request(None, &carrier),
        Landing::LoginPrompt { notice: None }
    );
}

/// 未知用户不写入任何记录，载体保持为空
#[test]
fn test_unknown_user_rejected() {
    let (service, _, _) = service(LoginMode::ImmediateSession);
    let carrier = MemoryCarrier::new();

    let err = service.request_login("x@y.com", &carrier).unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::UnknownUser(_))));
    assert_eq!(err.user_message(), "Invalid or inactive email.");

    assert!(service.store().is_empty().unwrap());
    assert!(carrier.token().is_none());
}

/// 停用用户与未知用户对外返回相同提示
#[test]
fn test_inactive_user_same_message() {
    let (service, _, _) = service(LoginMode::ImmediateSession);

    let unknown = service
        .request_login("x@y.com", &MemoryCarrier::new())
        .unwrap_err();
    let inactive = service
        .request_login("off@b.com", &MemoryCarrier::new())
        .unwrap_err();

    assert!(matches!(inactive, Error::Auth(AuthError::InactiveUser(_))));
    assert_eq!(unknown.user_message(), inactive.user_message());
}

/// 登出后 token 失效，重复登出不改变存储
#[test]
fn test_logout_twice() {
    let (service, _, _) = service(LoginMode::ImmediateSession);
    let carrier = MemoryCarrier::new();
    let other = MemoryCarrier::new();

    let mine = service.request_login("a@b.com", &carrier).unwrap();
    let theirs = service.request_login("c@d.com", &other).unwrap();

    assert_eq!(service.logout(&carrier).unwrap(), 1);
    let snapshot = service.store().records().unwrap();
    assert_eq!(service.logout(&carrier).unwrap(), 0);
    assert_eq!(service.store().records().unwrap(), snapshot);

    assert!(!service.validate_session(mine.token()));
    assert!(service.validate_session(theirs.token()));
}

// ============================================================================
// 邮件链接
// ============================================================================

/// 链接投递后点击即建立会话
#[test]
fn test_email_link_round_trip() {
    let (service, outbox, _) = service(LoginMode::EmailLink);
    let requester = MemoryCarrier::new();

    let outcome = service.request_login("a@b.com", &requester).unwrap();
    assert_eq!(outcome.attempt().state, LoginState::PendingVerification);
    assert!(requester.token().is_none());

    let sent = outbox.last().unwrap();
    assert_eq!(sent.email, "a@b.com");
    assert_eq!(sent.link.path(), "/welcome");

    let browser = MemoryCarrier::new();
    let landing = service.handle_request(sent.link.query(), &browser);
    assert!(landing.is_protected());
    assert_eq!(browser.token().as_deref(), Some(outcome.token()));
    assert!(service.current_session(&browser).is_some());
}

/// 篡改过的链接被拒绝，并给出统一提示
#[test]
fn test_tampered_link_rejected() {
    let (service, outbox, _) = service(LoginMode::EmailLink);
    service.request_login("a@b.com", &MemoryCarrier::new()).unwrap();

    let link = outbox.last().unwrap().link;
    let encoded = link
        .query_pairs()
        .find(|(k, _)| k == "login")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // 截断
    let truncated = &encoded[..encoded.len() / 2];
    let err = service
        .verify_link(truncated, &MemoryCarrier::new())
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));

    // 非法字符
    let err = service
        .verify_link(&format!("{}!!", encoded), &MemoryCarrier::new())
        .unwrap_err();
    assert!(matches!(err, Error::Decode(DecodeError::Signature(_))));

    let browser = MemoryCarrier::new();
    let landing = service.handle_request(Some(&format!("login={}", truncated)), &browser);
    assert_eq!(
        landing,
        Landing::LoginPrompt {
            notice: Some("Invalid or inactive email.")
        }
    );
    assert!(browser.token().is_none());
}

/// 链接中任意一个字符被替换后都不能建立会话
#[test]
fn test_single_character_changes_rejected() {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.";

    let (service, outbox, _) = service(LoginMode::EmailLink);
    service.request_login("a@b.com", &MemoryCarrier::new()).unwrap();
    let rows_before = service.store().records().unwrap();

    let link = outbox.last().unwrap().link;
    let encoded = link
        .query_pairs()
        .find(|(k, _)| k == "login")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let original = encoded.as_bytes();

    let mut tried = 0usize;
    for position in 0..original.len() {
        for &replacement in ALPHABET {
            if replacement == original[position] {
                continue;
            }
            let mut mutated = original.to_vec();
            mutated[position] = replacement;
            let mutated = String::from_utf8(mutated).unwrap();

            let browser = MemoryCarrier::new();
            assert!(
                service.verify_link(&mutated, &browser).is_err(),
                "accepted link altered at position {}",
                position
            );
            assert!(browser.token().is_none());
            tried += 1;
        }
    }

    assert!(tried > 1000);
    assert_eq!(service.store().records().unwrap(), rows_before);

    // 原链接仍然有效
    assert!(service.verify_link(&encoded, &MemoryCarrier::new()).is_ok());
}

/// 换成其他用户邮箱的链接不能通过重新计算
#[test]
fn test_link_for_other_user_rejected() {
    let (service, _, clock) = service(LoginMode::EmailLink);
    let expiry = linkauth::generate_expiry(7, clock.now()).unwrap();

    let forged = linkauth::LoginLinkPayload {
        email: "c@d.com".to_string(),
        token: compute_token("a@b.com", &expiry),
        expiry,
        issued_at: clock.now(),
    };
    let encoded = linkauth::encode_login_link(&forged, &LinkSigner::new(SERVER_KEY)).unwrap();

    let err = service
        .verify_link(&encoded, &MemoryCarrier::new())
        .unwrap_err();
    assert!(matches!(err, Error::Token(TokenError::Mismatch)));
}

/// 过期链接被拒绝
#[test]
fn test_expired_link_rejected() {
    let (service, outbox, clock) = service(LoginMode::EmailLink);
    service.request_login("a@b.com", &MemoryCarrier::new()).unwrap();
    let link = outbox.last().unwrap().link;

    clock.advance(Duration::days(8));

    let browser = MemoryCarrier::new();
    let landing = service.handle_request(link.query(), &browser);
    assert!(!landing.is_protected());
    assert!(browser.token().is_none());
}

/// 清理过期记录后存储只保留有效 token
#[test]
fn test_compact_after_expiry() {
    let (service, _, clock) = service(LoginMode::ImmediateSession);
    service.request_login("a@b.com", &MemoryCarrier::new()).unwrap();
    service.request_login("c@d.com", &MemoryCarrier::new()).unwrap();

    clock.advance(Duration::days(8));
    let fresh = service.request_login("a@b.com", &MemoryCarrier::new()).unwrap();

    assert_eq!(service.compact().unwrap(), 2);
    assert_eq!(service.compact().unwrap(), 0);
    assert_eq!(service.store().len().unwrap(), 1);
    assert!(service.validate_session(fresh.token()));
}
