pub mod migrations;
pub mod pool;
pub mod repositories;
pub mod store;

pub use pool::{create_pool, DbPool};
pub use repositories::{
    PostgresChatRepository, PostgresCreditTransactionRepository, PostgresPlanRepository,
    PostgresSessionRepository, PostgresSubscriptionRepository, PostgresUserRepository,
};
pub use store::{PostgresStore, PostgresTransaction};

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Database service combining all repositories
pub struct Database {
    pool: DbPool,
    pub store: Arc<PostgresStore>,
    pub users: Arc<PostgresUserRepository>,
    pub plans: Arc<PostgresPlanRepository>,
    pub subscriptions: Arc<PostgresSubscriptionRepository>,
    pub credit_transactions: Arc<PostgresCreditTransactionRepository>,
    pub chats: Arc<PostgresChatRepository>,
    pub sessions: Arc<PostgresSessionRepository>,
}

impl Database {
    /// Create a new database service from a connection pool
    pub fn new(pool: DbPool) -> Self {
        Self {
            store: Arc::new(PostgresStore::new(pool.clone())),
            users: Arc::new(PostgresUserRepository::new(pool.clone())),
            plans: Arc::new(PostgresPlanRepository::new(pool.clone())),
            subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool.clone())),
            credit_transactions: Arc::new(PostgresCreditTransactionRepository::new(pool.clone())),
            chats: Arc::new(PostgresChatRepository::new(pool.clone())),
            sessions: Arc::new(PostgresSessionRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new database service from configuration
    pub async fn from_config(config: &config::DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Attach configured provider price ids to the seeded plans
    pub async fn sync_plan_prices(&self, price_ids: &HashMap<String, String>) -> Result<()> {
        self.plans.sync_price_ids(price_ids).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
