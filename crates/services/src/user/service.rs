use async_trait::async_trait;
use std::sync::Arc;

use super::ports::{User, UserIdentity, UserRepository, UserService};
use crate::error::BillingError;
use crate::subscription::{SubscriptionRepository, SubscriptionService};
use crate::types::UserId;

pub struct UserServiceImpl {
    user_repository: Arc<dyn UserRepository>,
    subscription_repository: Arc<dyn SubscriptionRepository>,
    subscription_service: Arc<dyn SubscriptionService>,
}

impl UserServiceImpl {
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        subscription_repository: Arc<dyn SubscriptionRepository>,
        subscription_service: Arc<dyn SubscriptionService>,
    ) -> Self {
        Self {
            user_repository,
            subscription_repository,
            subscription_service,
        }
    }
}

#[async_trait]
impl UserService for UserServiceImpl {
    async fn ensure_user(&self, identity: &UserIdentity) -> Result<User, BillingError> {
        let user = match self.user_repository.get_user(identity.user_id).await? {
            Some(user) => user,
            None => {
                tracing::info!(
                    "Creating local user: user_id={}, email={}",
                    identity.user_id,
                    identity.email
                );
                self.user_repository.create_user(identity).await?
            }
        };

        if self
            .subscription_repository
            .has_any_subscription(user.id)
            .await?
        {
            return Ok(user);
        }

        tracing::info!("User has no subscriptions, bootstrapping free tier: user_id={}", user.id);
        self.subscription_service.bootstrap_free_tier(user.id).await?;
        self.get_user(user.id).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, BillingError> {
        tracing::debug!("Fetching user_id={}", user_id);
        self.user_repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionStatus;
    use crate::test_helpers::TestContext;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_first_sight_creates_user_and_bootstraps() {
        let ctx = TestContext::new();
        let identity = UserIdentity {
            user_id: UserId::new(),
            email: "new@example.com".to_string(),
        };

        let user = ctx.users.ensure_user(&identity).await.unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.credits_remaining, dec!(5));

        // second call is a plain lookup
        let again = ctx.users.ensure_user(&identity).await.unwrap();
        assert_eq!(again.credits_remaining, dec!(5));
        assert_eq!(ctx.store.subscriptions_for(identity.user_id).await.len(), 1);
        assert_eq!(ctx.store.credit_transactions_for(identity.user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_user_with_history_is_not_rebootstrapped() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("old@example.com", Decimal::ZERO).await;
        ctx.store
            .seed_subscription(
                user_id,
                "Starter",
                SubscriptionStatus::Canceled,
                crate::subscription::PaymentStatus::Paid,
                "sub_old",
            )
            .await;

        let user = ctx
            .users
            .ensure_user(&UserIdentity {
                user_id,
                email: "old@example.com".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(user.credits_remaining, Decimal::ZERO);
        assert_eq!(ctx.store.subscriptions_for(user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_user() {
        let ctx = TestContext::new();
        assert!(matches!(
            ctx.users.get_user(UserId::new()).await,
            Err(BillingError::NotFound(_))
        ));
    }
}
