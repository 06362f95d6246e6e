use crate::pool::DbPool;
use async_trait::async_trait;
use services::subscription::ports::{Subscription, SubscriptionRepository};
use services::UserId;
use tokio_postgres::Row;

pub(crate) const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, payment_status, \
     external_id, start_date, end_date, created_at, updated_at";

/// Most recently started first; ties broken by creation time
pub(crate) const CURRENT_ORDER: &str = "ORDER BY start_date DESC, created_at DESC";

pub(crate) fn subscription_from_row(row: &Row) -> anyhow::Result<Subscription> {
    let status: String = row.get("status");
    let payment_status: String = row.get("payment_status");
    Ok(Subscription {
        id: row.get("id"),
        user_id: row.get("user_id"),
        plan_id: row.get("plan_id"),
        status: status.parse()?,
        payment_status: payment_status.parse()?,
        external_id: row.get("external_id"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub struct PostgresSubscriptionRepository {
    pool: DbPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn get_current_subscriptions(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<Subscription>> {
        tracing::debug!(
            "Repository: Fetching current subscriptions for user_id={}",
            user_id
        );

        let client = self.pool.get().await?;

        let rows = client
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

    async fn get_user_subscriptions(&self, user_id: UserId) -> anyhow::Result<Vec<Subscription>> {
        tracing::debug!(
            "Repository: Fetching all subscriptions for user_id={}",
            user_id
        );

        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
                    SUBSCRIPTION_COLUMNS
                ),
                &[&user_id],
            )
            .await?;

        rows.iter().map(subscription_from_row).collect()
    }

    async fn has_any_subscription(&self, user_id: UserId) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM subscriptions WHERE user_id = $1)",
                &[&user_id],
            )
            .await?;

        Ok(row.get(0))
    }
}
