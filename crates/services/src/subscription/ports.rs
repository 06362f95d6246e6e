use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BillingError;
use crate::plan::Plan;
use crate::types::{PlanId, SubscriptionId, UserId};
use crate::user::ports::UserIdentity;

/// External id sentinel for subscriptions bootstrapped onto the free plan
pub const FREE_TIER_EXTERNAL_ID: &str = "free_tier";

/// Lifecycle state of a subscription row
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Canceled,
    Failed,
    #[serde(rename = "Pending Downgrade")]
    PendingDowngrade,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Canceled => "Canceled",
            Self::Failed => "Failed",
            Self::PendingDowngrade => "Pending Downgrade",
        }
    }

    /// Current subscriptions grant access and hold credits
    pub fn is_current(&self) -> bool {
        matches!(self, Self::Active | Self::PendingDowngrade)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Failed)
                | (Pending, Canceled)
                | (Active, Canceled)
                | (Active, PendingDowngrade)
                | (PendingDowngrade, Active)
                | (PendingDowngrade, Canceled)
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Active" => Ok(Self::Active),
            "Canceled" => Ok(Self::Canceled),
            "Failed" => Ok(Self::Failed),
            "Pending Downgrade" => Ok(Self::PendingDowngrade),
            other => Err(anyhow::anyhow!("Unknown subscription status: {}", other)),
        }
    }
}

/// Payment state of a subscription row
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Free,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Paid => "Paid",
            Self::Failed => "Failed",
            Self::Free => "Free",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Failed" => Ok(Self::Failed),
            "Free" => Ok(Self::Free),
            other => Err(anyhow::anyhow!("Unknown payment status: {}", other)),
        }
    }
}

/// Database model for subscription records
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    /// Checkout-session id, later the provider subscription id, or `free_tier`
    pub external_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// True when the external id refers to a live provider subscription
    /// (not the free-tier sentinel and not an unconverted checkout session)
    pub fn has_provider_subscription(&self) -> bool {
        self.external_id != FREE_TIER_EXTERNAL_ID && !self.external_id.starts_with("cs_")
    }
}

/// Values for a subscription row about to be inserted
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub external_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

/// API view of a user's current subscription
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub subscription_id: SubscriptionId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub start_date: DateTime<Utc>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub is_pending_downgrade: bool,
    /// Balance rounded up to two decimal places
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_remaining: Decimal,
}

/// Read access to subscription rows outside of a unit of work
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Current (Active or Pending Downgrade) subscriptions, most recently started first
    async fn get_current_subscriptions(&self, user_id: UserId)
        -> anyhow::Result<Vec<Subscription>>;

    /// All subscriptions for a user, most recently started first
    async fn get_user_subscriptions(&self, user_id: UserId) -> anyhow::Result<Vec<Subscription>>;

    async fn has_any_subscription(&self, user_id: UserId) -> anyhow::Result<bool>;
}

/// Service trait for subscription lifecycle operations
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Plan catalog ordered by price
    async fn list_plans(&self) -> Result<Vec<Plan>, BillingError>;

    /// Put a user onto the free plan and reset their balance to its allowance
    async fn bootstrap_free_tier(&self, user_id: UserId) -> Result<Subscription, BillingError>;

    /// Create a provider checkout session and a pending subscription; returns the redirect URL
    async fn create_checkout(
        &self,
        identity: &UserIdentity,
        plan_id: PlanId,
        success_url: Option<String>,
        cancel_url: Option<String>,
    ) -> Result<String, BillingError>;

    /// Cancel every current subscription and zero the balance
    async fn cancel_subscription(&self, user_id: UserId) -> Result<(), BillingError>;

    /// Move the latest Pending Downgrade subscription back to Active
    async fn restore_subscription(&self, user_id: UserId)
        -> Result<SubscriptionView, BillingError>;

    /// Move the current paid subscription to Pending Downgrade
    async fn schedule_downgrade(&self, user_id: UserId) -> Result<SubscriptionView, BillingError>;

    /// Current subscription with its plan and balance
    async fn get_current_subscription(
        &self,
        user_id: UserId,
    ) -> Result<SubscriptionView, BillingError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionStatus::*;

    const ALL: [SubscriptionStatus; 5] = [Pending, Active, Canceled, Failed, PendingDowngrade];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in ALL {
            assert!(!Canceled.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Canceled));
        assert!(Active.can_transition_to(PendingDowngrade));
        assert!(Active.can_transition_to(Canceled));
        assert!(PendingDowngrade.can_transition_to(Active));
        assert!(PendingDowngrade.can_transition_to(Canceled));

        assert!(!Active.can_transition_to(Pending));
        assert!(!Active.can_transition_to(Failed));
        assert!(!PendingDowngrade.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(PendingDowngrade));
    }

    #[test]
    fn test_no_self_transitions() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_status_round_trips_through_storage_text() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("active".parse::<SubscriptionStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&PendingDowngrade).unwrap(),
            "\"Pending Downgrade\""
        );
    }

    #[test]
    fn test_provider_subscription_detection() {
        let now = Utc::now();
        let mut sub = Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            plan_id: PlanId::new(),
            status: Active,
            payment_status: PaymentStatus::Free,
            external_id: FREE_TIER_EXTERNAL_ID.to_string(),
            start_date: now,
            end_date: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!sub.has_provider_subscription());
        sub.external_id = "cs_test_123".to_string();
        assert!(!sub.has_provider_subscription());
        sub.external_id = "sub_123".to_string();
        assert!(sub.has_provider_subscription());
    }
}
