use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::subscription::ports::SubscriptionStatus;
use crate::types::UserId;

/// Server-push event delivered to a user's open browser session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierEvent {
    #[serde(rename_all = "camelCase")]
    SubscriptionUpdated {
        user_id: UserId,
        /// None once every subscription is canceled
        status: Option<SubscriptionStatus>,
        plan: Option<String>,
        credits_remaining: Decimal,
    },
}

/// Fire-and-forget delivery of subscription changes
pub trait SubscriptionNotifier: Send + Sync {
    /// Never fails; delivery problems are logged and the channel evicted
    fn publish(&self, user_id: UserId, event: NotifierEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_wire_format() {
        let user_id = UserId::new();
        let event = NotifierEvent::SubscriptionUpdated {
            user_id,
            status: Some(SubscriptionStatus::PendingDowngrade),
            plan: Some("Pro".to_string()),
            credits_remaining: dec!(12.5),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "subscription_updated",
                "userId": user_id.to_string(),
                "status": "Pending Downgrade",
                "plan": "Pro",
                "creditsRemaining": "12.5",
            })
        );
    }
}
