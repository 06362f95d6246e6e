mod common;

use common::{bearer, create_test_app, decimal, mock_login, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

async fn create_chat(app: &TestApp, token: &str) -> String {
    let (name, value) = bearer(token);
    let response = app
        .server
        .post("/v1/chats")
        .add_header(name, value)
        .json(&json!({ "title": "Trip planning", "model": "gpt-4o" }))
        .await;
    assert_eq!(response.status_code(), 201);
    let body: serde_json::Value = response.json();
    body["id"].as_str().unwrap().to_string()
}

fn exchange() -> serde_json::Value {
    json!({
        "model": "gpt-4o",
        "prompt": "Where should I go in May?",
        "reply": "Lisbon is lovely in May.",
        "usage": { "promptTokens": 1000, "completionTokens": 500 }
    })
}

#[tokio::test]
async fn test_record_exchange_meters_credits() {
    let app = create_test_app();
    let (token, user_id) = mock_login(&app, "chatter@example.com").await;
    let chat_id = create_chat(&app, &token).await;

    let (name, value) = bearer(&token);
    let response = app
        .server
        .post(&format!("/v1/chats/{chat_id}/messages"))
        .add_header(name, value)
        .json(&exchange())
        .await;
    assert_eq!(response.status_code(), 201);
    let body: serde_json::Value = response.json();
    assert_eq!(decimal(&body["creditsUsed"]), dec!(0.75));
    assert_eq!(decimal(&body["creditsRemaining"]), dec!(4.25));

    let (name, value) = bearer(&token);
    let messages: serde_json::Value = app
        .server
        .get(&format!("/v1/chats/{chat_id}/messages"))
        .add_header(name, value)
        .await
        .json();
    let roles: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant"]);

    let ledger = app.ctx.store.credit_transactions_for(user_id).await;
    assert_eq!(ledger.last().unwrap().credits_deducted, dec!(0.75));
}

#[tokio::test]
async fn test_messages_need_credits() {
    let app = create_test_app();
    let (token, _) = mock_login(&app, "broke@example.com").await;
    let chat_id = create_chat(&app, &token).await;

    let (name, value) = bearer(&token);
    app.server
        .post("/v1/subscriptions/cancel")
        .add_header(name, value)
        .await
        .assert_status_ok();

    let (name, value) = bearer(&token);
    let response = app
        .server
        .post(&format!("/v1/chats/{chat_id}/authorize"))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 402);

    let (name, value) = bearer(&token);
    let response = app
        .server
        .post(&format!("/v1/chats/{chat_id}/messages"))
        .add_header(name, value)
        .json(&exchange())
        .await;
    assert_eq!(response.status_code(), 402);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "insufficient_credits");
}

#[tokio::test]
async fn test_deleted_chat_is_hidden() {
    let app = create_test_app();
    let (token, _) = mock_login(&app, "tidy@example.com").await;
    let chat_id = create_chat(&app, &token).await;

    let (name, value) = bearer(&token);
    let response = app
        .server
        .delete(&format!("/v1/chats/{chat_id}"))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 204);

    let (name, value) = bearer(&token);
    let response = app
        .server
        .get(&format!("/v1/chats/{chat_id}"))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 404);

    let (name, value) = bearer(&token);
    let body: serde_json::Value = app
        .server
        .get("/v1/chats")
        .add_header(name, value)
        .await
        .json();
    assert!(body["chats"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_foreign_chat_is_not_found() {
    let app = create_test_app();
    let (owner_token, _) = mock_login(&app, "owner@example.com").await;
    let (other_token, _) = mock_login(&app, "other@example.com").await;
    let chat_id = create_chat(&app, &owner_token).await;

    let (name, value) = bearer(&other_token);
    let response = app
        .server
        .post(&format!("/v1/chats/{chat_id}/messages"))
        .add_header(name, value)
        .json(&exchange())
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_invalid_chat_id_is_bad_request() {
    let app = create_test_app();
    let (token, _) = mock_login(&app, "typo@example.com").await;

    let (name, value) = bearer(&token);
    let response = app
        .server
        .get("/v1/chats/not-a-uuid")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 400);
}
