//! State-machine steps shared by user actions and webhook reconciliation.
//! All functions run inside a storage transaction that already holds the user lock.

use chrono::{DateTime, Months, Utc};

use super::ports::{Subscription, SubscriptionStatus};
use crate::credits::pricing::round_for_display;
use crate::error::BillingError;
use crate::notifier::NotifierEvent;
use crate::store::StoreTransaction;
use crate::types::{SubscriptionId, UserId};

/// End of a one-month billing period starting at `from`
pub fn one_month_from(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(1)).unwrap_or(from)
}

/// Move a subscription to `next`, enforcing the transition table
pub async fn transition(
    txn: &mut dyn StoreTransaction,
    subscription: &Subscription,
    next: SubscriptionStatus,
    end_date: Option<DateTime<Utc>>,
) -> Result<Subscription, BillingError> {
    if !subscription.status.can_transition_to(next) {
        return Err(BillingError::ValidationFailed(format!(
            "Subscription cannot move from {} to {}",
            subscription.status, next
        )));
    }

    let mut updated = subscription.clone();
    updated.status = next;
    updated.end_date = end_date;
    let updated = txn.update_subscription(&updated).await?;

    tracing::info!(
        "Subscription transitioned: subscription_id={}, user_id={}, from={}, to={}",
        updated.id,
        updated.user_id,
        subscription.status,
        next
    );
    Ok(updated)
}

/// Cancel every current subscription of the user except `keep`; returns the canceled rows
pub async fn cancel_current(
    txn: &mut dyn StoreTransaction,
    user_id: UserId,
    keep: Option<SubscriptionId>,
    now: DateTime<Utc>,
) -> Result<Vec<Subscription>, BillingError> {
    let mut canceled = Vec::new();
    for subscription in txn.get_current_subscriptions(user_id).await? {
        if Some(subscription.id) == keep {
            continue;
        }
        canceled.push(transition(txn, &subscription, SubscriptionStatus::Canceled, Some(now)).await?);
    }
    Ok(canceled)
}

/// Snapshot of the user's current subscription for the push notifier
pub async fn state_event(
    txn: &mut dyn StoreTransaction,
    user_id: UserId,
) -> Result<NotifierEvent, BillingError> {
    let user = txn
        .lock_user(user_id)
        .await?
        .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
    let current = txn.get_current_subscriptions(user_id).await?.into_iter().next();

    let (status, plan) = match current {
        Some(subscription) => {
            let plan = txn.get_plan(subscription.plan_id).await?.map(|plan| plan.name);
            (Some(subscription.status), plan)
        }
        None => (None, None),
    };

    Ok(NotifierEvent::SubscriptionUpdated {
        user_id,
        status,
        plan,
        credits_remaining: round_for_display(user.credits_remaining),
    })
}
