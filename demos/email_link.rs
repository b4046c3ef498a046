//! 邮件链接登录示例
//!
//! 使用内存发件箱代替 SMTP，展示链接的生成、点击验证以及过期和篡改时的行为。
//!
//! 运行: cargo run --example email_link

use chrono::Duration;
use linkauth::{
    AuthConfig, AuthService, InMemoryDirectory, InMemoryTokenStore, LoginMode, ManualClock,
    MemoryCarrier, MemoryOutbox,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> linkauth::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== linkauth 邮件链接示例 ===\n");

    let outbox = Arc::new(MemoryOutbox::new());
    let clock = Arc::new(ManualClock::starting_now());
    let directory = InMemoryDirectory::new().with_user("alice@example.com", true);

    let service = AuthService::new(
        AuthConfig::default()
            .with_mode(LoginMode::EmailLink)
            .with_base_url("https://app.example.com/"),
        Arc::new(directory),
        Arc::new(InMemoryTokenStore::new()),
    )?
    .with_delivery(outbox.clone())
    .with_clock(clock.clone());

    // 1. 请求登录链接
    service.request_login("alice@example.com", &MemoryCarrier::new())?;
    let Some(sent) = outbox.last() else {
        println!("没有投递任何链接");
        return Ok(());
    };
    println!("1. 发送给 {}:\n   {}\n", sent.email, sent.link);

    // 2. 点击链接
    let browser = MemoryCarrier::new();
    let landing = service.handle_request(sent.link.query(), &browser);
    println!("2. 点击链接: 已登录 = {}\n", landing.is_protected());

    // 3. 篡改链接
    let tampered = format!("{}x", sent.link.query().unwrap_or_default());
    let landing = service.handle_request(Some(&tampered), &MemoryCarrier::new());
    println!("3. 篡改后的链接: {:?}\n", landing);

    // 4. 8 天后
    clock.advance(Duration::days(8));
    let landing = service.handle_request(sent.link.query(), &MemoryCarrier::new());
    println!("4. 8 天后点击: {:?}", landing);
    println!("   原会话仍有效 = {}", service.current_session(&browser).is_some());

    println!("\n=== 示例完成 ===");
    Ok(())
}
