//! 直接建立会话示例
//!
//! 展示用户目录、文件 token 存储和签名 Cookie 如何配合完成登录、会话校验和登出。
//!
//! 运行: cargo run --example login_flow

use linkauth::{AuthConfig, AuthService, Landing};
use std::fs;
use tracing_subscriber::EnvFilter;

fn main() -> linkauth::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== linkauth 登录流程示例 ===\n");

    let dir = std::env::temp_dir().join("linkauth-login-flow");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("users.csv"), "email,active\nalice@example.com,1\nbob@example.com,0\n")?;
    let _ = fs::remove_file(dir.join("tokens.csv"));

    let config = AuthConfig::default()
        .with_files(dir.join("users.csv"), dir.join("tokens.csv"))
        .with_cookie_key("demo-cookie-key-change-me-in-production");
    let service = AuthService::from_config(config)?;

    // ========================================================================
    // 1. 登录
    // ========================================================================
    println!("1. 登录");

    for email in ["alice@example.com", "bob@example.com", "mallory@example.com"] {
        let carrier = service.cookie_carrier(None);
        match service.request_login(email, &carrier) {
            Ok(outcome) => println!("   ✓ {} 登录成功，有效期至 {}", email, outcome.attempt().expiry),
            Err(e) => println!("   ✗ {}: {}", email, e.user_message()),
        }
    }
    println!();

    // ========================================================================
    // 2. 用 Cookie 恢复会话
    // ========================================================================
    println!("2. 后续请求");

    let login = service.cookie_carrier(None);
    service.request_login("alice@example.com", &login)?;
    let set_cookie = login.take_set_cookie_headers();
    println!("   Set-Cookie: {}", set_cookie[0]);

    let cookie = set_cookie[0].split(';').next().unwrap_or_default().to_string();
    let request = service.cookie_carrier(Some(&cookie));
    match service.handle_request(Some("page=home"), &request) {
        Landing::Protected { token } => println!("   ✓ 已登录，token 前缀 {}…", &token[..12]),
        Landing::LoginPrompt { .. } => println!("   ✗ 需要登录"),
    }
    println!();

    // ========================================================================
    // 3. 登出
    // ========================================================================
    println!("3. 登出");

    let removed = service.logout(&request)?;
    println!("   删除了 {} 条记录", removed);
    for header in request.take_set_cookie_headers() {
        println!("   Set-Cookie: {}", header);
    }
    println!("   再次登出删除 {} 条", service.logout(&request)?);

    let compacted = service.compact()?;
    println!("   清理过期记录 {} 条", compacted);

    println!("\n=== 示例完成 ===");
    Ok(())
}
