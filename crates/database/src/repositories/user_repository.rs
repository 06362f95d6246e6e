use crate::pool::DbPool;
use async_trait::async_trait;
use services::{
    user::ports::{User, UserIdentity, UserRepository},
    UserId,
};
use tokio_postgres::Row;

pub(crate) const USER_COLUMNS: &str = "id, email, credits_remaining, created_at, updated_at";

pub(crate) fn user_from_row(row: &Row) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        credits_remaining: row.get("credits_remaining"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct PostgresUserRepository {
    pool: DbPool,
}

impl PostgresUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<User>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
                &[&user_id],
            )
            .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_user(&self, identity: &UserIdentity) -> anyhow::Result<User> {
        tracing::info!("Repository: Ensuring user row exists for user_id={}", identity.user_id);

        let client = self.pool.get().await?;

        // No-op update on conflict so RETURNING yields the existing row
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO users (id, email) VALUES ($1, $2)
                     ON CONFLICT (id) DO UPDATE SET email = users.email
                     RETURNING {}",
                    USER_COLUMNS
                ),
                &[&identity.user_id, &identity.email],
            )
            .await?;

        Ok(user_from_row(&row))
    }
}
