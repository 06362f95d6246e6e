use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the billing core (subscriptions, ledger, webhooks).
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        required: Decimal,
        available: Decimal,
    },
    #[error("Payment provider error: {0}")]
    ExternalProvider(String),
    #[error("Webhook signature invalid: {0}")]
    WebhookSignatureInvalid(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Errors raised by the chat session store.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat not found")]
    ChatNotFound,
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
