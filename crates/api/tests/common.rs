#![allow(dead_code)]

use api::{create_router, AppState};
use axum_test::TestServer;
use services::test_helpers::TestContext;
use services::UserId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

static SESSION_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// In-memory services plus a test server routed over them
pub struct TestApp {
    pub server: TestServer,
    pub ctx: TestContext,
}

/// Create a test server with every service backed by the in-memory store
pub fn create_test_app() -> TestApp {
    let ctx = TestContext::new();

    let app_state = AppState {
        subscription_service: ctx.subscriptions.clone(),
        webhook_service: ctx.webhooks.clone(),
        credits_service: ctx.credits.clone(),
        chat_service: ctx.chats.clone(),
        user_service: ctx.users.clone(),
        session_repository: ctx.store.clone(),
        notifier: ctx.notifier.clone(),
        sse_heartbeat: Duration::from_secs(30),
    };

    let server = TestServer::new(create_router(app_state)).expect("Failed to create test server");
    TestApp { server, ctx }
}

/// A fresh 37-character session token
pub fn new_session_token() -> String {
    let n = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("sess_{:032}", n)
}

/// Register a session for a new identity; returns (token, user id)
pub async fn mock_login(app: &TestApp, email: &str) -> (String, UserId) {
    let token = new_session_token();
    let user_id = UserId::new();
    app.ctx.store.seed_session(&token, user_id, email).await;
    (token, user_id)
}

pub fn bearer(token: &str) -> (http::HeaderName, http::HeaderValue) {
    (
        http::HeaderName::from_static("authorization"),
        http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

pub fn decimal(value: &serde_json::Value) -> rust_decimal::Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected a decimal string, got {value}"))
        .parse()
        .unwrap()
}
