pub mod auth;
pub mod chat;
pub mod credits;
pub mod error;
pub mod notifier;
pub mod payment;
pub mod plan;
pub mod store;
pub mod subscription;
pub mod test_helpers;
pub mod types;
pub mod user;
pub mod webhook;

pub use error::{BillingError, ChatError};
pub use types::{
    ChatId, ChatMessageId, CreditTransactionId, PaymentWebhookId, PlanId, SessionId,
    SubscriptionId, UserId,
};
