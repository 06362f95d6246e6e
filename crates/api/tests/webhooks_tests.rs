mod common;

use common::create_test_app;
use rust_decimal_macros::dec;
use serde_json::json;
use services::subscription::{PaymentStatus, SubscriptionStatus};
use services::test_helpers::signed_webhook;

fn signature_header(value: &str) -> (http::HeaderName, http::HeaderValue) {
    (
        http::HeaderName::from_static("stripe-signature"),
        http::HeaderValue::from_str(value).unwrap(),
    )
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = create_test_app();
    let payload = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#.to_vec();

    let response = app.server.post("/v1/webhooks/stripe").bytes(payload.into()).await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(app.ctx.store.recorded_webhooks().await, 0);
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() {
    let app = create_test_app();
    let payload = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
    let header = signed_webhook(payload);
    let tampered = br#"{"id":"evt_2","type":"invoice.paid","data":{"object":{}}}"#.to_vec();

    let (name, value) = signature_header(&header);
    let response = app
        .server
        .post("/v1/webhooks/stripe")
        .add_header(name, value)
        .bytes(tampered.into())
        .await;
    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "invalid_signature");
}

#[tokio::test]
async fn test_unknown_event_is_acknowledged() {
    let app = create_test_app();
    let payload = serde_json::to_vec(&json!({
        "id": "evt_unknown",
        "type": "customer.created",
        "data": {"object": {"id": "cus_1"}}
    }))
    .unwrap();

    let (name, value) = signature_header(&signed_webhook(&payload));
    let response = app
        .server
        .post("/v1/webhooks/stripe")
        .add_header(name, value)
        .bytes(payload.into())
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["received"], true);
    assert_eq!(body["type"], "customer.created");
}

#[tokio::test]
async fn test_duplicate_delivery_is_skipped() {
    let app = create_test_app();
    let user_id = app.ctx.store.seed_user("dup@example.com", dec!(0)).await;
    let pending = app
        .ctx
        .store
        .seed_subscription(
            user_id,
            "Starter",
            SubscriptionStatus::Pending,
            PaymentStatus::Pending,
            "cs_test_dup",
        )
        .await;

    let payload = serde_json::to_vec(&json!({
        "id": "evt_dup",
        "type": "checkout.session.completed",
        "data": {"object": {"id": "cs_test_dup", "subscription": "sub_dup"}}
    }))
    .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let (name, value) = signature_header(&signed_webhook(&payload));
        let response = app
            .server
            .post("/v1/webhooks/stripe")
            .add_header(name, value)
            .bytes(payload.clone().into())
            .await;
        assert_eq!(response.status_code(), 200);
        outcomes.push(response.json::<serde_json::Value>());
    }

    assert_eq!(outcomes[0]["skipped"], false);
    assert_eq!(outcomes[1]["skipped"], true);

    let user = app.ctx.store.user(user_id).await.unwrap();
    assert_eq!(user.credits_remaining, dec!(1000));
    assert_eq!(app.ctx.store.credit_transactions_for(user_id).await.len(), 1);

    let activated = app
        .ctx
        .store
        .subscriptions_for(user_id)
        .await
        .into_iter()
        .find(|s| s.id == pending.id)
        .unwrap();
    assert_eq!(activated.status, SubscriptionStatus::Active);
    assert_eq!(activated.external_id, "sub_dup");
}
