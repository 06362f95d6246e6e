use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::ledger::{self, LedgerContext};
use super::ports::{CreditTransactionRepository, CreditsService, CreditsSummary, PaymentMethod};
use super::pricing::round_for_display;
use crate::error::BillingError;
use crate::store::Store;
use crate::types::{SubscriptionId, UserId};
use crate::user::ports::UserRepository;

pub struct CreditsServiceImpl {
    store: Arc<dyn Store>,
    user_repository: Arc<dyn UserRepository>,
    transaction_repository: Arc<dyn CreditTransactionRepository>,
}

impl CreditsServiceImpl {
    pub fn new(
        store: Arc<dyn Store>,
        user_repository: Arc<dyn UserRepository>,
        transaction_repository: Arc<dyn CreditTransactionRepository>,
    ) -> Self {
        Self {
            store,
            user_repository,
            transaction_repository,
        }
    }
}

#[async_trait]
impl CreditsService for CreditsServiceImpl {
    async fn get_summary(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<CreditsSummary, BillingError> {
        tracing::debug!("Getting credits summary for user_id={}", user_id);

        let user = self
            .user_repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let recent_transactions = self
            .transaction_repository
            .list_transactions(user_id, limit)
            .await?;

        Ok(CreditsSummary {
            credits_remaining: user.credits_remaining,
            display_credits: round_for_display(user.credits_remaining),
            recent_transactions,
        })
    }

    async fn deduct(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: String,
    ) -> Result<Decimal, BillingError> {
        let mut txn = self.store.begin().await?;
        let mut user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;

        ledger::deduct(
            txn.as_mut(),
            &mut user,
            amount,
            LedgerContext::new(PaymentMethod::Usage, description),
        )
        .await?;
        txn.commit().await?;

        tracing::info!(
            "Credits deducted: user_id={}, amount={}, balance={}",
            user_id,
            amount,
            user.credits_remaining
        );
        Ok(user.credits_remaining)
    }

    async fn grant(
        &self,
        user_id: UserId,
        amount: Decimal,
        subscription_id: Option<SubscriptionId>,
        description: String,
    ) -> Result<Decimal, BillingError> {
        let mut txn = self.store.begin().await?;
        let mut user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;

        let mut context = LedgerContext::new(PaymentMethod::Stripe, description);
        context.subscription_id = subscription_id;
        ledger::grant(txn.as_mut(), &mut user, amount, context).await?;
        txn.commit().await?;

        tracing::info!(
            "Credits granted: user_id={}, amount={}, balance={}",
            user_id,
            amount,
            user.credits_remaining
        );
        Ok(user.credits_remaining)
    }

    async fn verify_balance(&self, user_id: UserId) -> Result<bool, BillingError> {
        let user = self
            .user_repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let ledger_sum = self.transaction_repository.sum_net_credits(user_id).await?;

        if ledger_sum != user.credits_remaining {
            tracing::warn!(
                "Ledger mismatch: user_id={}, balance={}, ledger_sum={}",
                user_id,
                user.credits_remaining,
                ledger_sum
            );
        }
        Ok(ledger_sum == user.credits_remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::InMemoryStore;
    use rust_decimal_macros::dec;

    async fn setup(balance: Decimal) -> (Arc<InMemoryStore>, CreditsServiceImpl, UserId) {
        let store = Arc::new(InMemoryStore::with_default_plans());
        let user_id = store.seed_user("ledger@example.com", balance).await;
        let service = CreditsServiceImpl::new(store.clone(), store.clone(), store.clone());
        (store, service, user_id)
    }

    #[tokio::test]
    async fn test_grant_and_deduct_reconcile() {
        let (store, service, user_id) = setup(Decimal::ZERO).await;

        service
            .grant(user_id, dec!(10), None, "top up".into())
            .await
            .unwrap();
        service
            .deduct(user_id, dec!(2.345678), "message".into())
            .await
            .unwrap();
        service
            .deduct(user_id, dec!(0.000001), "message".into())
            .await
            .unwrap();

        let user = store.user(user_id).await.unwrap();
        assert_eq!(user.credits_remaining, dec!(7.654321));
        assert!(service.verify_balance(user_id).await.unwrap());
        assert_eq!(
            ledger::reconcile(&store.credit_transactions_for(user_id).await),
            user.credits_remaining
        );
    }

    #[tokio::test]
    async fn test_over_deduction_leaves_balance_unchanged() {
        let (store, service, user_id) = setup(Decimal::ZERO).await;
        service
            .grant(user_id, dec!(1), None, "top up".into())
            .await
            .unwrap();

        let err = service
            .deduct(user_id, dec!(1.5), "message".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::InsufficientCredits { required, available }
                if required == dec!(1.5) && available == dec!(1)
        ));

        assert_eq!(store.user(user_id).await.unwrap().credits_remaining, dec!(1));
        assert_eq!(store.credit_transactions_for(user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_are_rejected() {
        let (_store, service, user_id) = setup(Decimal::ZERO).await;

        for amount in [Decimal::ZERO, dec!(-1), dec!(0.0000001)] {
            let err = service
                .grant(user_id, amount, None, "bad".into())
                .await
                .unwrap_err();
            assert!(matches!(err, BillingError::ValidationFailed(_)));
        }
    }

    #[tokio::test]
    async fn test_summary_rounds_display_balance_up() {
        let (_store, service, user_id) = setup(Decimal::ZERO).await;
        service
            .grant(user_id, dec!(4.991), None, "top up".into())
            .await
            .unwrap();

        let summary = service.get_summary(user_id, 10).await.unwrap();
        assert_eq!(summary.credits_remaining, dec!(4.991));
        assert_eq!(summary.display_credits, dec!(5.00));
        assert_eq!(summary.recent_transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (_store, service, _user_id) = setup(Decimal::ZERO).await;
        let err = service
            .deduct(UserId::new(), dec!(1), "message".into())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }
}
