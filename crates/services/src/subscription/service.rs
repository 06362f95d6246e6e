use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::lifecycle::{cancel_current, one_month_from, state_event, transition};
use super::ports::{
    NewSubscription, PaymentStatus, Subscription, SubscriptionRepository, SubscriptionService,
    SubscriptionStatus, SubscriptionView, FREE_TIER_EXTERNAL_ID,
};
use crate::credits::ledger::{self, LedgerContext};
use crate::credits::pricing::round_for_display;
use crate::credits::PaymentMethod;
use crate::error::BillingError;
use crate::notifier::SubscriptionNotifier;
use crate::payment::{CheckoutRequest, PaymentProvider};
use crate::plan::{Plan, PlanRepository};
use crate::store::Store;
use crate::types::{PlanId, UserId};
use crate::user::ports::{UserIdentity, UserRepository};

/// Configuration for SubscriptionServiceImpl
pub struct SubscriptionServiceConfig {
    pub store: Arc<dyn Store>,
    pub plan_repository: Arc<dyn PlanRepository>,
    pub subscription_repository: Arc<dyn SubscriptionRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub payment_provider: Arc<dyn PaymentProvider>,
    pub notifier: Arc<dyn SubscriptionNotifier>,
    /// Catalog name of the plan new users are bootstrapped onto
    pub free_plan_name: String,
    /// Default checkout redirect targets
    pub success_url: String,
    pub cancel_url: String,
}

pub struct SubscriptionServiceImpl {
    store: Arc<dyn Store>,
    plan_repository: Arc<dyn PlanRepository>,
    subscription_repository: Arc<dyn SubscriptionRepository>,
    user_repository: Arc<dyn UserRepository>,
    payment_provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn SubscriptionNotifier>,
    free_plan_name: String,
    success_url: String,
    cancel_url: String,
}

impl SubscriptionServiceImpl {
    pub fn new(config: SubscriptionServiceConfig) -> Self {
        Self {
            store: config.store,
            plan_repository: config.plan_repository,
            subscription_repository: config.subscription_repository,
            user_repository: config.user_repository,
            payment_provider: config.payment_provider,
            notifier: config.notifier,
            free_plan_name: config.free_plan_name,
            success_url: config.success_url,
            cancel_url: config.cancel_url,
        }
    }

    fn view(subscription: &Subscription, plan: &Plan, credits_remaining: Decimal) -> SubscriptionView {
        SubscriptionView {
            subscription_id: subscription.id,
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            status: subscription.status,
            payment_status: subscription.payment_status,
            start_date: subscription.start_date,
            renewal_date: subscription.end_date,
            is_pending_downgrade: subscription.status == SubscriptionStatus::PendingDowngrade,
            credits_remaining: round_for_display(credits_remaining),
        }
    }

    /// Flip auto-renewal upstream as part of a transaction; failures abort the caller
    async fn require_auto_renew(
        &self,
        subscription: &Subscription,
        enabled: bool,
    ) -> Result<(), BillingError> {
        if !subscription.has_provider_subscription() {
            return Ok(());
        }
        self.payment_provider
            .set_auto_renew(&subscription.external_id, enabled)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to update auto-renew upstream: subscription_id={}, enabled={}, error={}",
                    subscription.id,
                    enabled,
                    e
                );
                BillingError::Internal(format!("Failed to update subscription renewal: {}", e))
            })
    }
}

#[async_trait]
impl SubscriptionService for SubscriptionServiceImpl {
    async fn list_plans(&self) -> Result<Vec<Plan>, BillingError> {
        tracing::debug!("Listing subscription plans");
        Ok(self.plan_repository.list_plans().await?)
    }

    async fn bootstrap_free_tier(&self, user_id: UserId) -> Result<Subscription, BillingError> {
        tracing::info!("Bootstrapping free tier for user_id={}", user_id);

        let mut txn = self.store.begin().await?;
        let mut user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let plan = txn
            .get_plan_by_name(&self.free_plan_name)
            .await?
            .ok_or_else(|| {
                BillingError::Internal(format!("Plan '{}' is not seeded", self.free_plan_name))
            })?;

        let now = Utc::now();
        cancel_current(txn.as_mut(), user_id, None, now).await?;

        let subscription = txn
            .insert_subscription(NewSubscription {
                user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Active,
                payment_status: PaymentStatus::Free,
                external_id: FREE_TIER_EXTERNAL_ID.to_string(),
                start_date: now,
                end_date: Some(one_month_from(now)),
            })
            .await?;

        ledger::reset(
            txn.as_mut(),
            &mut user,
            plan.credits_per_month,
            LedgerContext::new(
                PaymentMethod::FreeTier,
                format!("{} plan monthly credits", plan.name),
            )
            .with_subscription(subscription.id),
        )
        .await?;

        let event = state_event(txn.as_mut(), user_id).await?;
        txn.commit().await?;
        self.notifier.publish(user_id, event);

        tracing::info!(
            "Free tier bootstrapped: user_id={}, subscription_id={}, credits={}",
            user_id,
            subscription.id,
            user.credits_remaining
        );
        Ok(subscription)
    }

    async fn create_checkout(
        &self,
        identity: &UserIdentity,
        plan_id: PlanId,
        success_url: Option<String>,
        cancel_url: Option<String>,
    ) -> Result<String, BillingError> {
        tracing::info!(
            "Creating checkout for user_id={}, plan_id={}",
            identity.user_id,
            plan_id
        );

        if identity.email.trim().is_empty() {
            return Err(BillingError::ValidationFailed(
                "An email address is required to subscribe".to_string(),
            ));
        }

        let plan = self
            .plan_repository
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Plan not found: {}", plan_id)))?;
        let price_id = match (&plan.external_price_id, plan.is_free()) {
            (Some(price_id), false) => price_id.clone(),
            _ => {
                return Err(BillingError::ValidationFailed(format!(
                    "Plan '{}' cannot be purchased",
                    plan.name
                )))
            }
        };

        if self
            .user_repository
            .get_user(identity.user_id)
            .await?
            .is_none()
        {
            tracing::info!(
                "Creating local user before checkout: user_id={}",
                identity.user_id
            );
            self.user_repository.create_user(identity).await?;
        }

        let session = self
            .payment_provider
            .create_checkout_session(CheckoutRequest {
                user_id: identity.user_id,
                email: identity.email.clone(),
                plan_id: plan.id,
                price_id,
                success_url: success_url.unwrap_or_else(|| self.success_url.clone()),
                cancel_url: cancel_url.unwrap_or_else(|| self.cancel_url.clone()),
            })
            .await?;

        let mut txn = self.store.begin().await?;
        txn.lock_user(identity.user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let subscription = txn
            .insert_subscription(NewSubscription {
                user_id: identity.user_id,
                plan_id: plan.id,
                status: SubscriptionStatus::Pending,
                payment_status: PaymentStatus::Pending,
                external_id: session.session_id.clone(),
                start_date: Utc::now(),
                end_date: None,
            })
            .await?;
        txn.commit().await?;

        tracing::info!(
            "Pending subscription created: user_id={}, subscription_id={}, session_id={}",
            identity.user_id,
            subscription.id,
            session.session_id
        );
        Ok(session.url)
    }

    async fn cancel_subscription(&self, user_id: UserId) -> Result<(), BillingError> {
        tracing::info!("Canceling subscription for user_id={}", user_id);

        let current = self
            .subscription_repository
            .get_current_subscriptions(user_id)
            .await?;
        if current.is_empty() {
            return Err(BillingError::NotFound(
                "No active subscription found".to_string(),
            ));
        }

        for subscription in current.iter().filter(|s| s.has_provider_subscription()) {
            if let Err(e) = self
                .payment_provider
                .cancel_subscription(&subscription.external_id)
                .await
            {
                tracing::warn!(
                    "Upstream cancellation failed, continuing: subscription_id={}, external_id={}, error={}",
                    subscription.id,
                    subscription.external_id,
                    e
                );
            }
        }

        let mut txn = self.store.begin().await?;
        let mut user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;

        let canceled = cancel_current(txn.as_mut(), user_id, None, Utc::now()).await?;
        let Some(first) = canceled.first() else {
            return Err(BillingError::NotFound(
                "No active subscription found".to_string(),
            ));
        };

        ledger::reset(
            txn.as_mut(),
            &mut user,
            Decimal::ZERO,
            LedgerContext::new(PaymentMethod::Cancellation, "Subscription canceled")
                .with_subscription(first.id),
        )
        .await?;

        let event = state_event(txn.as_mut(), user_id).await?;
        txn.commit().await?;
        self.notifier.publish(user_id, event);

        tracing::info!(
            "Subscription canceled: user_id={}, canceled_count={}",
            user_id,
            canceled.len()
        );
        Ok(())
    }

    async fn restore_subscription(
        &self,
        user_id: UserId,
    ) -> Result<SubscriptionView, BillingError> {
        tracing::info!("Restoring subscription for user_id={}", user_id);

        let mut txn = self.store.begin().await?;
        let user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let subscription = txn
            .get_latest_subscription_with_status(user_id, SubscriptionStatus::PendingDowngrade)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound("No subscription pending downgrade".to_string())
            })?;
        let plan = txn
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::Internal("Subscription plan missing".to_string()))?;

        let restored = transition(
            txn.as_mut(),
            &subscription,
            SubscriptionStatus::Active,
            subscription.end_date,
        )
        .await?;
        // Dropping txn on error rolls the local change back
        self.require_auto_renew(&restored, true).await?;

        let event = state_event(txn.as_mut(), user_id).await?;
        txn.commit().await?;
        self.notifier.publish(user_id, event);

        tracing::info!(
            "Subscription restored: user_id={}, subscription_id={}",
            user_id,
            restored.id
        );
        Ok(Self::view(&restored, &plan, user.credits_remaining))
    }

    async fn schedule_downgrade(&self, user_id: UserId) -> Result<SubscriptionView, BillingError> {
        tracing::info!("Scheduling downgrade for user_id={}", user_id);

        let mut txn = self.store.begin().await?;
        let user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let subscription = txn
            .get_current_subscriptions(user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::NotFound("No active subscription found".to_string()))?;
        let plan = txn
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::Internal("Subscription plan missing".to_string()))?;

        if plan.is_free() || !subscription.has_provider_subscription() {
            return Err(BillingError::ValidationFailed(
                "Free plan subscriptions cannot be downgraded".to_string(),
            ));
        }

        let downgraded = transition(
            txn.as_mut(),
            &subscription,
            SubscriptionStatus::PendingDowngrade,
            subscription.end_date,
        )
        .await?;
        self.require_auto_renew(&downgraded, false).await?;

        let event = state_event(txn.as_mut(), user_id).await?;
        txn.commit().await?;
        self.notifier.publish(user_id, event);

        tracing::info!(
            "Downgrade scheduled: user_id={}, subscription_id={}, ends_at={:?}",
            user_id,
            downgraded.id,
            downgraded.end_date
        );
        Ok(Self::view(&downgraded, &plan, user.credits_remaining))
    }

    async fn get_current_subscription(
        &self,
        user_id: UserId,
    ) -> Result<SubscriptionView, BillingError> {
        tracing::debug!("Getting current subscription for user_id={}", user_id);

        let current = self
            .subscription_repository
            .get_current_subscriptions(user_id)
            .await?;
        if current.len() > 1 {
            tracing::warn!(
                "User has {} current subscriptions, using the most recent: user_id={}",
                current.len(),
                user_id
            );
        }
        let subscription = current
            .into_iter()
            .next()
            .ok_or_else(|| BillingError::NotFound("No active subscription found".to_string()))?;

        let plan = self
            .plan_repository
            .get_plan(subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::Internal("Subscription plan missing".to_string()))?;
        let user = self
            .user_repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;

        if subscription.status == SubscriptionStatus::PendingDowngrade
            && subscription.has_provider_subscription()
        {
            if let Err(e) = self
                .payment_provider
                .set_auto_renew(&subscription.external_id, false)
                .await
            {
                tracing::warn!(
                    "Failed to confirm disabled auto-renew: subscription_id={}, error={}",
                    subscription.id,
                    e
                );
            }
        }

        Ok(Self::view(&subscription, &plan, user.credits_remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::ledger::reconcile;
    use crate::notifier::NotifierEvent;
    use crate::test_helpers::{signed_webhook, PaymentCall, TestContext};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_bootstrap_free_tier() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("free@example.com", Decimal::ZERO).await;
        let mut connection = ctx.notifier.connect(user_id);

        let subscription = ctx
            .subscriptions
            .bootstrap_free_tier(user_id)
            .await
            .unwrap();

        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.payment_status, PaymentStatus::Free);
        assert_eq!(subscription.external_id, FREE_TIER_EXTERNAL_ID);
        assert_eq!(subscription.end_date, Some(one_month_from(subscription.start_date)));

        let user = ctx.store.user(user_id).await.unwrap();
        assert_eq!(user.credits_remaining, dec!(5));

        let rows = ctx.store.credit_transactions_for(user_id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].credits_added, dec!(5));
        assert_eq!(rows[0].credits_deducted, Decimal::ZERO);
        assert_eq!(rows[0].payment_method, PaymentMethod::FreeTier);
        assert_eq!(rows[0].subscription_id, Some(subscription.id));

        match connection.recv().await.unwrap() {
            NotifierEvent::SubscriptionUpdated {
                status,
                plan,
                credits_remaining,
                ..
            } => {
                assert_eq!(status, Some(SubscriptionStatus::Active));
                assert_eq!(plan.as_deref(), Some("Free"));
                assert_eq!(credits_remaining, dec!(5));
            }
        }
    }

    #[tokio::test]
    async fn test_bootstrap_replaces_existing_current_subscription() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("again@example.com", Decimal::ZERO).await;
        ctx.subscriptions.bootstrap_free_tier(user_id).await.unwrap();
        ctx.subscriptions.bootstrap_free_tier(user_id).await.unwrap();

        let subs = ctx.store.subscriptions_for(user_id).await;
        assert_eq!(subs.iter().filter(|s| s.status.is_current()).count(), 1);
        assert_eq!(subs.len(), 2);

        let user = ctx.store.user(user_id).await.unwrap();
        assert_eq!(user.credits_remaining, dec!(5));
        assert_eq!(
            reconcile(&ctx.store.credit_transactions_for(user_id).await),
            dec!(5)
        );
    }

    async fn assert_lifecycle_invariants(ctx: &TestContext, user_id: UserId, step: &str) {
        let current = ctx
            .store
            .subscriptions_for(user_id)
            .await
            .iter()
            .filter(|s| s.status.is_current())
            .count();
        assert!(current <= 1, "{step}: {current} current subscriptions");
        assert!(
            ctx.credits.verify_balance(user_id).await.unwrap(),
            "{step}: balance does not match ledger"
        );
    }

    #[tokio::test]
    async fn test_mixed_lifecycle_keeps_one_current_subscription() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("mixed@example.com", Decimal::ZERO).await;
        let identity = UserIdentity {
            user_id,
            email: "mixed@example.com".to_string(),
        };

        ctx.subscriptions.bootstrap_free_tier(user_id).await.unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "bootstrap").await;

        let starter = ctx.store.plan_named("Starter").await;
        ctx.subscriptions
            .create_checkout(&identity, starter.id, None, None)
            .await
            .unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "checkout").await;

        let session_id = ctx
            .store
            .subscriptions_for(user_id)
            .await
            .into_iter()
            .find(|s| s.status == SubscriptionStatus::Pending)
            .unwrap()
            .external_id;
        let payload = serde_json::to_vec(&serde_json::json!({
            "id": "evt_mixed",
            "type": "checkout.session.completed",
            "data": {"object": {"id": session_id, "subscription": "sub_mixed"}}
        }))
        .unwrap();
        ctx.webhooks
            .handle_stripe_webhook(&payload, Some(&signed_webhook(&payload)))
            .await
            .unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "checkout completed").await;
        assert_eq!(ctx.store.user(user_id).await.unwrap().credits_remaining, dec!(1000));

        ctx.subscriptions.schedule_downgrade(user_id).await.unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "downgrade").await;

        ctx.subscriptions.restore_subscription(user_id).await.unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "restore").await;

        ctx.subscriptions.cancel_subscription(user_id).await.unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "cancel").await;
        assert_eq!(ctx.store.user(user_id).await.unwrap().credits_remaining, Decimal::ZERO);

        ctx.subscriptions.bootstrap_free_tier(user_id).await.unwrap();
        assert_lifecycle_invariants(&ctx, user_id, "bootstrap again").await;

        let current = ctx.subscriptions.get_current_subscription(user_id).await.unwrap();
        assert_eq!(current.plan_name, "Free");
        assert_eq!(current.credits_remaining, dec!(5));
    }

    #[tokio::test]
    async fn test_create_checkout_inserts_pending_subscription() {
        let ctx = TestContext::new();
        let starter = ctx.store.plan_named("Starter").await;
        let identity = UserIdentity {
            user_id: UserId::new(),
            email: "buyer@example.com".to_string(),
        };

        let url = ctx
            .subscriptions
            .create_checkout(&identity, starter.id, None, Some("https://app.test/back".into()))
            .await
            .unwrap();
        assert!(url.starts_with("https://checkout.stripe.test/"));

        // user created on the fly, not free-bootstrapped
        let user = ctx.store.user(identity.user_id).await.unwrap();
        assert_eq!(user.credits_remaining, Decimal::ZERO);
        assert!(ctx.store.credit_transactions_for(identity.user_id).await.is_empty());

        let subs = ctx.store.subscriptions_for(identity.user_id).await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, SubscriptionStatus::Pending);
        assert_eq!(subs[0].payment_status, PaymentStatus::Pending);
        assert!(subs[0].external_id.starts_with("cs_test_"));

        match &ctx.payments.calls()[0] {
            PaymentCall::Checkout {
                price_id,
                success_url,
                cancel_url,
                ..
            } => {
                assert_eq!(price_id, "price_starter");
                assert_eq!(success_url, "https://app.test/success");
                assert_eq!(cancel_url, "https://app.test/back");
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_checkout_validation() {
        let ctx = TestContext::new();
        let free = ctx.store.plan_named("Free").await;
        let starter = ctx.store.plan_named("Starter").await;
        let identity = UserIdentity {
            user_id: UserId::new(),
            email: "buyer@example.com".to_string(),
        };

        let err = ctx
            .subscriptions
            .create_checkout(&identity, PlanId::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));

        let err = ctx
            .subscriptions
            .create_checkout(&identity, free.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ValidationFailed(_)));

        let no_email = UserIdentity {
            email: " ".to_string(),
            ..identity.clone()
        };
        let err = ctx
            .subscriptions
            .create_checkout(&no_email, starter.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ValidationFailed(_)));
        assert!(ctx.payments.calls().is_empty());
    }

    #[tokio::test]
    async fn test_checkout_provider_failure_writes_nothing() {
        let ctx = TestContext::new();
        ctx.payments.fail_checkout(true);
        let starter = ctx.store.plan_named("Starter").await;
        let user_id = ctx.store.seed_user("buyer@example.com", Decimal::ZERO).await;
        let identity = UserIdentity {
            user_id,
            email: "buyer@example.com".to_string(),
        };

        let err = ctx
            .subscriptions
            .create_checkout(&identity, starter.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ExternalProvider(_)));
        assert!(ctx.store.subscriptions_for(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_zeroes_balance() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("pro@example.com", dec!(1000)).await;
        let sub = ctx
            .store
            .seed_subscription(
                user_id,
                "Starter",
                SubscriptionStatus::Active,
                PaymentStatus::Paid,
                "sub_live_1",
            )
            .await;

        ctx.subscriptions.cancel_subscription(user_id).await.unwrap();

        let subs = ctx.store.subscriptions_for(user_id).await;
        assert_eq!(subs[0].status, SubscriptionStatus::Canceled);
        assert!(subs[0].end_date.is_some());
        assert_eq!(ctx.store.user(user_id).await.unwrap().credits_remaining, Decimal::ZERO);

        let rows = ctx.store.credit_transactions_for(user_id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].credits_deducted, dec!(1000));
        assert_eq!(rows[0].credits_added, Decimal::ZERO);
        assert_eq!(rows[0].payment_method, PaymentMethod::Cancellation);
        assert_eq!(rows[0].subscription_id, Some(sub.id));

        assert_eq!(
            ctx.payments.calls(),
            vec![PaymentCall::Cancel("sub_live_1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancel_continues_when_upstream_fails() {
        let ctx = TestContext::new();
        ctx.payments.fail_cancel(true);
        let user_id = ctx.store.seed_user("pro@example.com", dec!(10)).await;
        ctx.store
            .seed_subscription(
                user_id,
                "Pro",
                SubscriptionStatus::PendingDowngrade,
                PaymentStatus::Paid,
                "sub_live_2",
            )
            .await;

        ctx.subscriptions.cancel_subscription(user_id).await.unwrap();
        let subs = ctx.store.subscriptions_for(user_id).await;
        assert_eq!(subs[0].status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_skips_upstream_for_free_tier() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("free@example.com", Decimal::ZERO).await;
        ctx.subscriptions.bootstrap_free_tier(user_id).await.unwrap();

        ctx.subscriptions.cancel_subscription(user_id).await.unwrap();
        assert!(ctx.payments.calls().is_empty());
        assert!(ctx.subscriptions.get_current_subscription(user_id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_without_subscription_is_not_found() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("none@example.com", Decimal::ZERO).await;
        let err = ctx
            .subscriptions
            .cancel_subscription(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert!(ctx.store.credit_transactions_for(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_restore_without_pending_downgrade_is_not_found() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("active@example.com", dec!(3)).await;
        let sub = ctx
            .store
            .seed_subscription(
                user_id,
                "Starter",
                SubscriptionStatus::Active,
                PaymentStatus::Paid,
                "sub_live_3",
            )
            .await;

        let err = ctx
            .subscriptions
            .restore_subscription(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));

        let subs = ctx.store.subscriptions_for(user_id).await;
        assert_eq!(subs, vec![sub]);
        assert!(ctx.payments.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_reactivates_and_enables_renewal() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("back@example.com", dec!(42.001)).await;
        ctx.store
            .seed_subscription(
                user_id,
                "Pro",
                SubscriptionStatus::PendingDowngrade,
                PaymentStatus::Paid,
                "sub_live_4",
            )
            .await;

        let view = ctx.subscriptions.restore_subscription(user_id).await.unwrap();
        assert_eq!(view.status, SubscriptionStatus::Active);
        assert!(!view.is_pending_downgrade);
        assert_eq!(view.plan_name, "Pro");
        assert_eq!(view.credits_remaining, dec!(42.01));
        assert_eq!(
            ctx.payments.calls(),
            vec![PaymentCall::AutoRenew("sub_live_4".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_restore_rolls_back_when_upstream_fails() {
        let ctx = TestContext::new();
        ctx.payments.fail_auto_renew(true);
        let user_id = ctx.store.seed_user("back@example.com", dec!(1)).await;
        ctx.store
            .seed_subscription(
                user_id,
                "Pro",
                SubscriptionStatus::PendingDowngrade,
                PaymentStatus::Paid,
                "sub_live_5",
            )
            .await;

        let err = ctx
            .subscriptions
            .restore_subscription(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Internal(_)));

        let subs = ctx.store.subscriptions_for(user_id).await;
        assert_eq!(subs[0].status, SubscriptionStatus::PendingDowngrade);
    }

    #[tokio::test]
    async fn test_schedule_downgrade() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("down@example.com", dec!(7)).await;
        ctx.store
            .seed_subscription(
                user_id,
                "Starter",
                SubscriptionStatus::Active,
                PaymentStatus::Paid,
                "sub_live_6",
            )
            .await;

        let view = ctx.subscriptions.schedule_downgrade(user_id).await.unwrap();
        assert!(view.is_pending_downgrade);
        assert_eq!(
            ctx.payments.calls(),
            vec![PaymentCall::AutoRenew("sub_live_6".to_string(), false)]
        );

        // a second request finds nothing to downgrade from
        let err = ctx
            .subscriptions
            .schedule_downgrade(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_free_tier_cannot_be_downgraded() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("free@example.com", Decimal::ZERO).await;
        ctx.subscriptions.bootstrap_free_tier(user_id).await.unwrap();

        let err = ctx
            .subscriptions
            .schedule_downgrade(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_current_subscription_view() {
        let ctx = TestContext::new();
        let user_id = ctx.store.seed_user("view@example.com", dec!(0.001)).await;
        let sub = ctx
            .store
            .seed_subscription(
                user_id,
                "Pro",
                SubscriptionStatus::PendingDowngrade,
                PaymentStatus::Paid,
                "sub_live_7",
            )
            .await;

        let view = ctx
            .subscriptions
            .get_current_subscription(user_id)
            .await
            .unwrap();
        assert_eq!(view.plan_name, "Pro");
        assert_eq!(view.renewal_date, sub.end_date);
        assert!(view.is_pending_downgrade);
        assert_eq!(view.credits_remaining, dec!(0.01));

        // best-effort renewal guard for pending downgrades
        assert_eq!(
            ctx.payments.calls(),
            vec![PaymentCall::AutoRenew("sub_live_7".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_current_subscription_survives_upstream_failure() {
        let ctx = TestContext::new();
        ctx.payments.fail_auto_renew(true);
        let user_id = ctx.store.seed_user("view@example.com", Decimal::ZERO).await;
        ctx.store
            .seed_subscription(
                user_id,
                "Pro",
                SubscriptionStatus::PendingDowngrade,
                PaymentStatus::Paid,
                "sub_live_8",
            )
            .await;

        assert!(ctx
            .subscriptions
            .get_current_subscription(user_id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_list_plans_ordered_by_price() {
        let ctx = TestContext::new();
        let names: Vec<String> = ctx
            .subscriptions
            .list_plans()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Free", "Starter", "Pro"]);
    }
}
