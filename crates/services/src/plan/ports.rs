use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::PlanId;

/// Name of the free plan every new user is bootstrapped onto
pub const FREE_PLAN_NAME: &str = "Free";

/// Plan catalog entry (seeded reference data)
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Monthly price in USD
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub price: Decimal,
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_per_month: Decimal,
    /// Payment-provider price id; absent for the free plan
    #[serde(skip_serializing)]
    pub external_price_id: Option<String>,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}

/// Read access to the plan catalog
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// All plans ordered by price
    async fn list_plans(&self) -> anyhow::Result<Vec<Plan>>;

    async fn get_plan(&self, plan_id: PlanId) -> anyhow::Result<Option<Plan>>;

    async fn get_plan_by_name(&self, name: &str) -> anyhow::Result<Option<Plan>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plan_serialization_hides_price_id() {
        let plan = Plan {
            id: PlanId::new(),
            name: "Starter".to_string(),
            price: dec!(10.00),
            credits_per_month: dec!(1000),
            external_price_id: Some("price_starter".to_string()),
        };
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["name"], "Starter");
        assert_eq!(json["creditsPerMonth"], "1000");
        assert!(json.get("externalPriceId").is_none());
        assert!(!plan.is_free());
    }
}
