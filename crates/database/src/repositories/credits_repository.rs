use crate::pool::DbPool;
use async_trait::async_trait;
use rust_decimal::Decimal;
use services::credits::ports::{CreditTransaction, CreditTransactionRepository};
use services::UserId;
use tokio_postgres::Row;

pub(crate) const CREDIT_TRANSACTION_COLUMNS: &str = "id, user_id, subscription_id, \
     credits_added, credits_deducted, payment_method, description, created_at";

pub(crate) fn credit_transaction_from_row(row: &Row) -> anyhow::Result<CreditTransaction> {
    let payment_method: String = row.get("payment_method");
    Ok(CreditTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        subscription_id: row.get("subscription_id"),
        credits_added: row.get("credits_added"),
        credits_deducted: row.get("credits_deducted"),
        payment_method: payment_method.parse()?,
        description: row.get("description"),
        created_at: row.get("created_at"),
    })
}

pub struct PostgresCreditTransactionRepository {
    pool: DbPool,
}

impl PostgresCreditTransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditTransactionRepository for PostgresCreditTransactionRepository {
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> anyhow::Result<Vec<CreditTransaction>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM credit_transactions
                     WHERE user_id = $1
                     ORDER BY created_at DESC
                     LIMIT $2",
                    CREDIT_TRANSACTION_COLUMNS
                ),
                &[&user_id, &limit],
            )
            .await?;

        rows.iter().map(credit_transaction_from_row).collect()
    }

    async fn sum_net_credits(&self, user_id: UserId) -> anyhow::Result<Decimal> {
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                "SELECT COALESCE(SUM(credits_added - credits_deducted), 0)
                 FROM credit_transactions
                 WHERE user_id = $1",
                &[&user_id],
            )
            .await?;

        Ok(row.get(0))
    }
}
