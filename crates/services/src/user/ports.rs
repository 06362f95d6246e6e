use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::BillingError;
use crate::types::UserId;

/// Represents a user in the system
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Never negative; mutated only through the credit ledger
    pub credits_remaining: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller identity as asserted by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub email: String,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<User>>;

    /// Insert the user with a zero balance; returns the existing row when already present
    async fn create_user(&self, identity: &UserIdentity) -> anyhow::Result<User>;
}

#[async_trait]
pub trait UserService: Send + Sync {
    /// Return the local user for an identity, creating it and bootstrapping
    /// the free tier on first sight
    async fn ensure_user(&self, identity: &UserIdentity) -> Result<User, BillingError>;

    async fn get_user(&self, user_id: UserId) -> Result<User, BillingError>;
}
