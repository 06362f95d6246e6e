use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BillingError;
use crate::types::{CreditTransactionId, SubscriptionId, UserId};

/// Source of a ledger movement
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    FreeTier,
    Stripe,
    Usage,
    Cancellation,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreeTier => "free_tier",
            Self::Stripe => "stripe",
            Self::Usage => "usage",
            Self::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_tier" => Ok(Self::FreeTier),
            "stripe" => Ok(Self::Stripe),
            "usage" => Ok(Self::Usage),
            "cancellation" => Ok(Self::Cancellation),
            other => Err(anyhow::anyhow!("Unknown payment method: {}", other)),
        }
    }
}

/// Append-only ledger row; every balance change has exactly one
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: CreditTransactionId,
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_added: Decimal,
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_deducted: Decimal,
    pub payment_method: PaymentMethod,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn net(&self) -> Decimal {
        self.credits_added - self.credits_deducted
    }
}

#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub credits_added: Decimal,
    pub credits_deducted: Decimal,
    pub payment_method: PaymentMethod,
    pub description: String,
}

/// Balance plus the latest ledger rows
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsSummary {
    /// Balance at storage precision
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_remaining: Decimal,
    /// Balance rounded up to two decimal places
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub display_credits: Decimal,
    pub recent_transactions: Vec<CreditTransaction>,
}

#[async_trait]
pub trait CreditTransactionRepository: Send + Sync {
    /// Most recent ledger rows first
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> anyhow::Result<Vec<CreditTransaction>>;

    /// Sum of (added - deducted) over every row of the user
    async fn sum_net_credits(&self, user_id: UserId) -> anyhow::Result<Decimal>;
}

#[async_trait]
pub trait CreditsService: Send + Sync {
    async fn get_summary(&self, user_id: UserId, limit: i64)
        -> Result<CreditsSummary, BillingError>;

    /// Deduct credits; returns the new balance
    async fn deduct(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: String,
    ) -> Result<Decimal, BillingError>;

    /// Grant credits; returns the new balance
    async fn grant(
        &self,
        user_id: UserId,
        amount: Decimal,
        subscription_id: Option<SubscriptionId>,
        description: String,
    ) -> Result<Decimal, BillingError>;

    /// Whether the stored balance equals the ledger sum
    async fn verify_balance(&self, user_id: UserId) -> Result<bool, BillingError>;
}
