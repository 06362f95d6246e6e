use async_trait::async_trait;
use deadpool_postgres::Object;
use rust_decimal::Decimal;
use services::chat::ports::{Chat, ChatMessage, NewChatMessage};
use services::credits::ports::{CreditTransaction, NewCreditTransaction};
use services::plan::Plan;
use services::store::{NewPaymentWebhook, Store, StoreTransaction};
use services::subscription::ports::{NewSubscription, Subscription, SubscriptionStatus};
use services::user::ports::User;
use services::{ChatId, PlanId, UserId};

use crate::pool::DbPool;
use crate::repositories::chat_repository::{
    chat_from_row, chat_message_from_row, CHAT_COLUMNS, CHAT_MESSAGE_COLUMNS,
};
use crate::repositories::credits_repository::{
    credit_transaction_from_row, CREDIT_TRANSACTION_COLUMNS,
};
use crate::repositories::plan_repository::{plan_from_row, PLAN_COLUMNS};
use crate::repositories::subscription_repository::{
    subscription_from_row, CURRENT_ORDER, SUBSCRIPTION_COLUMNS,
};
use crate::repositories::user_repository::{user_from_row, USER_COLUMNS};

/// Unit-of-work entry point over the connection pool
pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTransaction>> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PostgresTransaction {
            client: Some(client),
        }))
    }
}

/// An open transaction on a pooled connection.
///
/// The transaction owns its connection so it can cross `await` points behind a
/// trait object. Dropping it without `commit` issues a `ROLLBACK` before the
/// connection goes back to the pool.
pub struct PostgresTransaction {
    client: Option<Object>,
}

impl PostgresTransaction {
    fn client(&self) -> anyhow::Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Transaction already finished"))
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::error!("Failed to roll back transaction: {}", e);
                        // Never hand a connection in an unknown state back to the pool
                        let _ = Object::take(client);
                    } else {
                        tracing::debug!("Transaction rolled back");
                    }
                });
            }
            Err(_) => {
                let _ = Object::take(client);
            }
        }
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_user(&mut self, user_id: UserId) -> anyhow::Result<Option<User>> {
        let row = self
            .client()?
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1 FOR UPDATE", USER_COLUMNS),
                &[&user_id],
            )
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn set_user_credits(&mut self, user_id: UserId, credits: Decimal) -> anyhow::Result<()> {
        let updated = self
            .client()?
            .execute(
                "UPDATE users SET credits_remaining = $2, updated_at = NOW() WHERE id = $1",
                &[&user_id, &credits],
            )
            .await?;
        if updated == 0 {
            anyhow::bail!("User not found: {}", user_id);
        }
        Ok(())
    }

    async fn get_plan(&mut self, plan_id: PlanId) -> anyhow::Result<Option<Plan>> {
        let row = self
            .client()?
            .query_opt(
                &format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS),
                &[&plan_id],
            )
            .await?;
        Ok(row.as_ref().map(plan_from_row))
    }

    async fn get_plan_by_name(&mut self, name: &str) -> anyhow::Result<Option<Plan>> {
        let row = self
            .client()?
            .query_opt(
                &format!("SELECT {} FROM plans WHERE name = $1", PLAN_COLUMNS),
                &[&name],
            )
            .await?;
        Ok(row.as_ref().map(plan_from_row))
    }

    async fn get_current_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<Subscription>> {
        let rows = self
            .client()?
            .query(
                &format!(
                    "SELECT {} FROM subscriptions
                     WHERE user_id = $1 AND status IN ('Active', 'Pending Downgrade')
                     {}",
                    SUBSCRIPTION_COLUMNS, CURRENT_ORDER
                ),
                &[&user_id],
            )
            .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn get_latest_subscription_with_status(
        &mut self,
        user_id: UserId,
        status: SubscriptionStatus,
    ) -> anyhow::Result<Option<Subscription>> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT {} FROM subscriptions
                     WHERE user_id = $1 AND status = $2
                     {}
                     LIMIT 1",
                    SUBSCRIPTION_COLUMNS, CURRENT_ORDER
                ),
                &[&user_id, &status.as_str()],
            )
            .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn find_subscription_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<Subscription>> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT {} FROM subscriptions
                     WHERE external_id = $1
                     ORDER BY created_at DESC
                     LIMIT 1",
                    SUBSCRIPTION_COLUMNS
                ),
                &[&external_id],
            )
            .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> anyhow::Result<Subscription> {
        let row = self
            .client()?
            .query_one(
                &format!(
                    "INSERT INTO subscriptions (
                        user_id, plan_id, status, payment_status, external_id, start_date, end_date
                     )
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING {}",
                    SUBSCRIPTION_COLUMNS
                ),
                &[
                    &subscription.user_id,
                    &subscription.plan_id,
                    &subscription.status.as_str(),
                    &subscription.payment_status.as_str(),
                    &subscription.external_id,
                    &subscription.start_date,
                    &subscription.end_date,
                ],
            )
            .await?;
        subscription_from_row(&row)
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> anyhow::Result<Subscription> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "UPDATE subscriptions
                     SET status = $2, payment_status = $3, external_id = $4,
                         start_date = $5, end_date = $6, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {}",
                    SUBSCRIPTION_COLUMNS
                ),
                &[
                    &subscription.id,
                    &subscription.status.as_str(),
                    &subscription.payment_status.as_str(),
                    &subscription.external_id,
                    &subscription.start_date,
                    &subscription.end_date,
                ],
            )
            .await?
            .ok_or_else(|| anyhow::anyhow!("Subscription not found: {}", subscription.id))?;
        subscription_from_row(&row)
    }

    async fn insert_credit_transaction(
        &mut self,
        transaction: NewCreditTransaction,
    ) -> anyhow::Result<CreditTransaction> {
        let row = self
            .client()?
            .query_one(
                &format!(
                    "INSERT INTO credit_transactions (
                        user_id, subscription_id, credits_added, credits_deducted,
                        payment_method, description
                     )
                     VALUES ($1, $2, $3, $4, $5, $6)
                     RETURNING {}",
                    CREDIT_TRANSACTION_COLUMNS
                ),
                &[
                    &transaction.user_id,
                    &transaction.subscription_id,
                    &transaction.credits_added,
                    &transaction.credits_deducted,
                    &transaction.payment_method.as_str(),
                    &transaction.description,
                ],
            )
            .await?;
        credit_transaction_from_row(&row)
    }

    async fn record_webhook(&mut self, webhook: NewPaymentWebhook) -> anyhow::Result<bool> {
        tracing::info!(
            "Repository: Storing payment webhook - provider={}, event_id={}",
            webhook.provider,
            webhook.event_id
        );

        // Idempotent through UNIQUE (provider, event_id)
        let inserted = self
            .client()?
            .execute(
                "INSERT INTO payment_webhooks (provider, event_id, event_type, payload)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (provider, event_id) DO NOTHING",
                &[
                    &webhook.provider,
                    &webhook.event_id,
                    &webhook.event_type,
                    &webhook.payload,
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    async fn get_chat(&mut self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<Option<Chat>> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT {} FROM chats WHERE id = $1 AND user_id = $2 AND NOT is_deleted",
                    CHAT_COLUMNS
                ),
                &[&chat_id, &user_id],
            )
            .await?;
        Ok(row.as_ref().map(chat_from_row))
    }

    async fn insert_chat_message(
        &mut self,
        message: NewChatMessage,
    ) -> anyhow::Result<ChatMessage> {
        let row = self
            .client()?
            .query_one(
                &format!(
                    "INSERT INTO chat_history (
                        chat_id, user_id, role, content, model,
                        prompt_tokens, completion_tokens, credits_used
                     )
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     RETURNING {}",
                    CHAT_MESSAGE_COLUMNS
                ),
                &[
                    &message.chat_id,
                    &message.user_id,
                    &message.role.as_str(),
                    &message.content,
                    &message.model,
                    &message.prompt_tokens,
                    &message.completion_tokens,
                    &message.credits_used,
                ],
            )
            .await?;
        chat_message_from_row(&row)
    }

    async fn commit(mut self: Box<Self>) -> anyhow::Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| anyhow::anyhow!("Transaction already finished"))?;
        if let Err(e) = client.batch_execute("COMMIT").await {
            let _ = Object::take(client);
            return Err(e.into());
        }
        Ok(())
    }
}
