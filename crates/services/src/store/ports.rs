use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::chat::ports::{Chat, ChatMessage, NewChatMessage};
use crate::credits::ports::{CreditTransaction, NewCreditTransaction};
use crate::plan::Plan;
use crate::subscription::ports::{NewSubscription, Subscription, SubscriptionStatus};
use crate::types::{ChatId, PlanId, UserId};
use crate::user::ports::User;

/// Verified webhook delivery about to be recorded
#[derive(Debug, Clone)]
pub struct NewPaymentWebhook {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Entry point for units of work spanning users, subscriptions and the ledger
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTransaction>>;
}

/// A storage transaction. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Load the user row and hold its lock until the transaction ends
    async fn lock_user(&mut self, user_id: UserId) -> anyhow::Result<Option<User>>;

    async fn set_user_credits(&mut self, user_id: UserId, credits: Decimal) -> anyhow::Result<()>;

    async fn get_plan(&mut self, plan_id: PlanId) -> anyhow::Result<Option<Plan>>;

    async fn get_plan_by_name(&mut self, name: &str) -> anyhow::Result<Option<Plan>>;

    /// Active or Pending Downgrade rows, most recently started first
    async fn get_current_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<Subscription>>;

    async fn get_latest_subscription_with_status(
        &mut self,
        user_id: UserId,
        status: SubscriptionStatus,
    ) -> anyhow::Result<Option<Subscription>>;

    async fn find_subscription_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<Subscription>>;

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> anyhow::Result<Subscription>;

    /// Persist status, payment status, external id and end date of an existing row
    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> anyhow::Result<Subscription>;

    async fn insert_credit_transaction(
        &mut self,
        transaction: NewCreditTransaction,
    ) -> anyhow::Result<CreditTransaction>;

    /// Returns false when (provider, event_id) was already recorded
    async fn record_webhook(&mut self, webhook: NewPaymentWebhook) -> anyhow::Result<bool>;

    async fn get_chat(&mut self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<Option<Chat>>;

    async fn insert_chat_message(&mut self, message: NewChatMessage)
        -> anyhow::Result<ChatMessage>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}
