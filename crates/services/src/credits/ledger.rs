//! Balance mutations inside a storage transaction.
//!
//! Every function updates `users.credits_remaining` and appends exactly one
//! `CreditTransaction`. Callers are expected to have locked the user row via
//! [`StoreTransaction::lock_user`] in the same transaction.

use rust_decimal::Decimal;

use super::ports::{CreditTransaction, NewCreditTransaction, PaymentMethod};
use super::pricing::round_for_storage;
use crate::error::BillingError;
use crate::store::StoreTransaction;
use crate::types::SubscriptionId;
use crate::user::ports::User;

/// What a ledger movement is attributed to
#[derive(Debug, Clone)]
pub struct LedgerContext {
    pub subscription_id: Option<SubscriptionId>,
    pub payment_method: PaymentMethod,
    pub description: String,
}

impl LedgerContext {
    pub fn new(payment_method: PaymentMethod, description: impl Into<String>) -> Self {
        Self {
            subscription_id: None,
            payment_method,
            description: description.into(),
        }
    }

    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }
}

fn validate_amount(amount: Decimal) -> Result<Decimal, BillingError> {
    let amount = round_for_storage(amount);
    if amount <= Decimal::ZERO {
        return Err(BillingError::ValidationFailed(format!(
            "Credit amount must be positive, got {}",
            amount
        )));
    }
    Ok(amount)
}

async fn write(
    txn: &mut dyn StoreTransaction,
    user: &mut User,
    new_balance: Decimal,
    credits_added: Decimal,
    credits_deducted: Decimal,
    context: LedgerContext,
) -> Result<CreditTransaction, BillingError> {
    txn.set_user_credits(user.id, new_balance).await?;
    let transaction = txn
        .insert_credit_transaction(NewCreditTransaction {
            user_id: user.id,
            subscription_id: context.subscription_id,
            credits_added,
            credits_deducted,
            payment_method: context.payment_method,
            description: context.description,
        })
        .await?;
    user.credits_remaining = new_balance;
    Ok(transaction)
}

/// Remove `amount` from the balance; fails without writing if the balance is too low
pub async fn deduct(
    txn: &mut dyn StoreTransaction,
    user: &mut User,
    amount: Decimal,
    context: LedgerContext,
) -> Result<CreditTransaction, BillingError> {
    let amount = validate_amount(amount)?;
    if amount > user.credits_remaining {
        tracing::info!(
            "Insufficient credits: user_id={}, required={}, available={}",
            user.id,
            amount,
            user.credits_remaining
        );
        return Err(BillingError::InsufficientCredits {
            required: amount,
            available: user.credits_remaining,
        });
    }

    let new_balance = user.credits_remaining - amount;
    write(txn, user, new_balance, Decimal::ZERO, amount, context).await
}

/// Add `amount` to the balance
pub async fn grant(
    txn: &mut dyn StoreTransaction,
    user: &mut User,
    amount: Decimal,
    context: LedgerContext,
) -> Result<CreditTransaction, BillingError> {
    let amount = validate_amount(amount)?;
    let new_balance = user.credits_remaining + amount;
    write(txn, user, new_balance, amount, Decimal::ZERO, context).await
}

/// Replace the balance: the row records the new balance as added and the prior one as deducted
pub async fn reset(
    txn: &mut dyn StoreTransaction,
    user: &mut User,
    new_balance: Decimal,
    context: LedgerContext,
) -> Result<CreditTransaction, BillingError> {
    let new_balance = round_for_storage(new_balance);
    if new_balance.is_sign_negative() {
        return Err(BillingError::ValidationFailed(format!(
            "Balance must not be negative, got {}",
            new_balance
        )));
    }
    let prior = user.credits_remaining;
    write(txn, user, new_balance, new_balance, prior, context).await
}

/// Balance implied by a set of ledger rows
pub fn reconcile(transactions: &[CreditTransaction]) -> Decimal {
    transactions.iter().map(CreditTransaction::net).sum()
}
