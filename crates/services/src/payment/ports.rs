use async_trait::async_trait;
use thiserror::Error;

use crate::error::BillingError;
use crate::types::{PlanId, UserId};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment provider is not configured")]
    NotConfigured,
    #[error("Invalid provider id: {0}")]
    InvalidId(String),
    #[error("{0}")]
    Provider(String),
}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        Self::ExternalProvider(err.to_string())
    }
}

/// Parameters for a hosted checkout session
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub email: String,
    pub plan_id: PlanId,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

/// Outbound calls to the payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Cancel a provider subscription immediately
    async fn cancel_subscription(&self, external_id: &str) -> Result<(), PaymentError>;

    /// Enable or disable renewal at the end of the current period
    async fn set_auto_renew(&self, external_id: &str, enabled: bool) -> Result<(), PaymentError>;
}
