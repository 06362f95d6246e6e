use crate::pool::DbPool;
use async_trait::async_trait;
use services::{
    plan::ports::{Plan, PlanRepository},
    PlanId,
};
use std::collections::HashMap;
use tokio_postgres::Row;

pub(crate) const PLAN_COLUMNS: &str = "id, name, price, credits_per_month, external_price_id";

pub(crate) fn plan_from_row(row: &Row) -> Plan {
    Plan {
        id: row.get("id"),
        name: row.get("name"),
        price: row.get("price"),
        credits_per_month: row.get("credits_per_month"),
        external_price_id: row.get("external_price_id"),
    }
}

pub struct PostgresPlanRepository {
    pool: DbPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Write configured provider price ids onto the seeded plans
    pub async fn sync_price_ids(&self, price_ids: &HashMap<String, String>) -> anyhow::Result<()> {
        let client = self.pool.get().await?;

        for (name, price_id) in price_ids {
            let updated = client
                .execute(
                    "UPDATE plans SET external_price_id = $2 WHERE name = $1",
                    &[&name, &price_id],
                )
                .await?;
            if updated == 0 {
                tracing::warn!("No plan named {} to attach price id to", name);
            } else {
                tracing::info!("Plan price id synced: plan={}", name);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn list_plans(&self) -> anyhow::Result<Vec<Plan>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!("SELECT {} FROM plans ORDER BY price ASC", PLAN_COLUMNS),
                &[],
            )
            .await?;

        Ok(rows.iter().map(plan_from_row).collect())
    }

    async fn get_plan(&self, plan_id: PlanId) -> anyhow::Result<Option<Plan>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS),
                &[&plan_id],
            )
            .await?;

        Ok(row.as_ref().map(plan_from_row))
    }

    async fn get_plan_by_name(&self, name: &str) -> anyhow::Result<Option<Plan>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM plans WHERE name = $1", PLAN_COLUMNS),
                &[&name],
            )
            .await?;

        Ok(row.as_ref().map(plan_from_row))
    }
}
