use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

use crate::error::BillingError;

/// Checkout session object carried by `checkout.session.*` events
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    /// Provider subscription id; may arrive expanded as an object
    #[serde(default, deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Subscription object carried by `customer.subscription.*` events
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

/// Known webhook events; everything else is `Unknown`
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    CheckoutCompleted(CheckoutSessionObject),
    CheckoutExpired(CheckoutSessionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    /// `invoice.*`: acknowledged without effects
    Invoice,
    Unknown,
}

/// A verified delivery with its envelope fields
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub event: WebhookEvent,
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Object(object)) => object
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string),
        _ => None,
    })
}

fn object<T: serde::de::DeserializeOwned>(
    event_type: &str,
    value: serde_json::Value,
) -> Result<T, BillingError> {
    serde_json::from_value(value).map_err(|e| {
        BillingError::ValidationFailed(format!(
            "Malformed {} payload: {}",
            event_type, e
        ))
    })
}

/// Parse the raw body of a verified delivery
pub fn parse_event(payload: &[u8]) -> Result<ParsedEvent, BillingError> {
    let raw: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| BillingError::ValidationFailed(format!("Invalid webhook JSON: {}", e)))?;
    let envelope: Envelope = serde_json::from_value(raw.clone())
        .map_err(|e| BillingError::ValidationFailed(format!("Invalid webhook envelope: {}", e)))?;

    let event = match envelope.event_type.as_str() {
        "checkout.session.completed" => WebhookEvent::CheckoutCompleted(object(
            &envelope.event_type,
            envelope.data.object,
        )?),
        "checkout.session.expired" => {
            WebhookEvent::CheckoutExpired(object(&envelope.event_type, envelope.data.object)?)
        }
        "customer.subscription.updated" => WebhookEvent::SubscriptionUpdated(object(
            &envelope.event_type,
            envelope.data.object,
        )?),
        "customer.subscription.deleted" => WebhookEvent::SubscriptionDeleted(object(
            &envelope.event_type,
            envelope.data.object,
        )?),
        other if other.starts_with("invoice.") => WebhookEvent::Invoice,
        _ => WebhookEvent::Unknown,
    };

    Ok(ParsedEvent {
        id: envelope.id,
        event_type: envelope.event_type,
        payload: raw,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_checkout_completed_with_string_subscription() {
        let parsed = parse_event(&body(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "subscription": "sub_1",
                "client_reference_id": "user-1",
                "metadata": {"plan_id": "p"}
            }}
        })))
        .unwrap();

        assert_eq!(parsed.id, "evt_1");
        match parsed.event {
            WebhookEvent::CheckoutCompleted(session) => {
                assert_eq!(session.id, "cs_test_1");
                assert_eq!(session.subscription.as_deref(), Some("sub_1"));
                assert_eq!(session.metadata.get("plan_id").map(String::as_str), Some("p"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_checkout_completed_with_expanded_or_null_subscription() {
        let expanded = parse_event(&body(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_1", "subscription": {"id": "sub_9", "object": "subscription"}}}
        })))
        .unwrap();
        assert!(matches!(
            expanded.event,
            WebhookEvent::CheckoutCompleted(CheckoutSessionObject { subscription: Some(ref s), .. }) if s == "sub_9"
        ));

        let null = parse_event(&body(json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_1", "subscription": null}}
        })))
        .unwrap();
        assert!(matches!(
            null.event,
            WebhookEvent::CheckoutCompleted(CheckoutSessionObject { subscription: None, .. })
        ));
    }

    #[test]
    fn test_subscription_updated() {
        let parsed = parse_event(&body(json!({
            "id": "evt_3",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_1",
                "status": "active",
                "cancel_at_period_end": true,
                "current_period_end": 1_700_000_000
            }}
        })))
        .unwrap();
        assert_eq!(
            parsed.event,
            WebhookEvent::SubscriptionUpdated(SubscriptionObject {
                id: "sub_1".into(),
                status: "active".into(),
                cancel_at_period_end: true,
                current_period_end: Some(1_700_000_000),
            })
        );
    }

    #[test]
    fn test_invoice_and_unknown_events() {
        let invoice = parse_event(&body(json!({
            "id": "evt_4", "type": "invoice.paid", "data": {"object": {"id": "in_1"}}
        })))
        .unwrap();
        assert_eq!(invoice.event, WebhookEvent::Invoice);

        let unknown = parse_event(&body(json!({
            "id": "evt_5", "type": "customer.created", "data": {"object": {}}
        })))
        .unwrap();
        assert_eq!(unknown.event, WebhookEvent::Unknown);
        assert_eq!(unknown.event_type, "customer.created");
    }

    #[test]
    fn test_malformed_payloads_are_validation_errors() {
        for payload in [
            b"not json".to_vec(),
            body(json!({"type": "invoice.paid", "data": {"object": {}}})),
            body(json!({"id": "evt", "type": "customer.subscription.updated", "data": {"object": {"id": "sub"}}})),
        ] {
            assert!(matches!(
                parse_event(&payload),
                Err(BillingError::ValidationFailed(_))
            ));
        }
    }
}
