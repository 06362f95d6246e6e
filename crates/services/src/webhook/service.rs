use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::dedup::EventDeduplicator;
use super::events::{parse_event, CheckoutSessionObject, ParsedEvent, SubscriptionObject, WebhookEvent};
use super::signature::WebhookVerifier;
use crate::credits::ledger::{self, LedgerContext};
use crate::credits::PaymentMethod;
use crate::error::BillingError;
use crate::notifier::{NotifierEvent, SubscriptionNotifier};
use crate::payment::PaymentProvider;
use crate::store::{NewPaymentWebhook, Store, StoreTransaction};
use crate::subscription::lifecycle::{cancel_current, one_month_from, state_event, transition};
use crate::subscription::{PaymentStatus, Subscription, SubscriptionStatus};
use crate::types::UserId;

const PROVIDER: &str = "stripe";

/// Acknowledgement returned to the provider
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub received: bool,
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub skipped: bool,
}

#[async_trait]
pub trait WebhookService: Send + Sync {
    /// Verify, deduplicate and apply one raw delivery
    async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, BillingError>;
}

/// Configuration for WebhookServiceImpl
pub struct WebhookServiceConfig {
    pub store: Arc<dyn Store>,
    pub payment_provider: Arc<dyn PaymentProvider>,
    pub notifier: Arc<dyn SubscriptionNotifier>,
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
    pub dedup_window: Duration,
}

pub struct WebhookServiceImpl {
    store: Arc<dyn Store>,
    payment_provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn SubscriptionNotifier>,
    verifier: WebhookVerifier,
    dedup: EventDeduplicator,
}

/// Effects to run once the transaction has committed
#[derive(Default)]
struct Applied {
    notification: Option<(UserId, NotifierEvent)>,
    /// Provider subscriptions superseded by an activation
    superseded: Vec<Subscription>,
}

/// Local changes implied by an upstream subscription object
#[derive(Debug, PartialEq)]
struct UpstreamChange {
    status: Option<SubscriptionStatus>,
    payment_status: Option<PaymentStatus>,
    end_date: Option<DateTime<Utc>>,
}

fn upstream_change(object: &SubscriptionObject, now: DateTime<Utc>) -> UpstreamChange {
    let period_end = object
        .current_period_end
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    match object.status.as_str() {
        "active" | "trialing" if object.cancel_at_period_end => UpstreamChange {
            status: Some(SubscriptionStatus::PendingDowngrade),
            payment_status: Some(PaymentStatus::Paid),
            end_date: period_end,
        },
        "active" | "trialing" => UpstreamChange {
            status: Some(SubscriptionStatus::Active),
            payment_status: Some(PaymentStatus::Paid),
            end_date: period_end,
        },
        "canceled" | "incomplete_expired" => UpstreamChange {
            status: Some(SubscriptionStatus::Canceled),
            payment_status: None,
            end_date: Some(now),
        },
        "past_due" | "unpaid" => UpstreamChange {
            status: None,
            payment_status: Some(PaymentStatus::Failed),
            end_date: period_end,
        },
        _ => UpstreamChange {
            status: None,
            payment_status: None,
            end_date: period_end,
        },
    }
}

impl WebhookServiceImpl {
    pub fn new(config: WebhookServiceConfig) -> Self {
        Self {
            store: config.store,
            payment_provider: config.payment_provider,
            notifier: config.notifier,
            verifier: WebhookVerifier::new(config.webhook_secret, config.signature_tolerance_secs),
            dedup: EventDeduplicator::new(config.dedup_window),
        }
    }

    /// Find a subscription by external id, then lock its owner and re-read it under the lock
    async fn locked_subscription(
        txn: &mut dyn StoreTransaction,
        external_id: &str,
    ) -> Result<Option<Subscription>, BillingError> {
        let Some(found) = txn.find_subscription_by_external_id(external_id).await? else {
            return Ok(None);
        };
        txn.lock_user(found.user_id).await?;
        Ok(txn.find_subscription_by_external_id(external_id).await?)
    }

    /// Run the effects of one event inside a single transaction.
    /// Returns None when the durable log shows the event was already applied.
    async fn apply(&self, parsed: &ParsedEvent) -> Result<Option<Applied>, BillingError> {
        let mut txn = self.store.begin().await?;

        let is_new = txn
            .record_webhook(NewPaymentWebhook {
                provider: PROVIDER.to_string(),
                event_id: parsed.id.clone(),
                event_type: parsed.event_type.clone(),
                payload: parsed.payload.clone(),
            })
            .await?;
        if !is_new {
            tracing::info!(
                "Webhook already recorded (duplicate): event_id={}, type={}",
                parsed.id,
                parsed.event_type
            );
            return Ok(None);
        }

        let applied = match &parsed.event {
            WebhookEvent::CheckoutCompleted(session) => {
                self.checkout_completed(txn.as_mut(), session).await?
            }
            WebhookEvent::CheckoutExpired(session) => {
                self.checkout_expired(txn.as_mut(), session).await?
            }
            WebhookEvent::SubscriptionUpdated(object) => {
                self.subscription_updated(txn.as_mut(), object).await?
            }
            WebhookEvent::SubscriptionDeleted(object) => {
                self.subscription_deleted(txn.as_mut(), object).await?
            }
            WebhookEvent::Invoice => {
                tracing::debug!(
                    "Invoice event acknowledged without effects: event_id={}, type={}",
                    parsed.id,
                    parsed.event_type
                );
                Applied::default()
            }
            WebhookEvent::Unknown => {
                tracing::info!(
                    "Unhandled webhook event type acknowledged: event_id={}, type={}",
                    parsed.id,
                    parsed.event_type
                );
                Applied::default()
            }
        };

        txn.commit().await?;
        Ok(Some(applied))
    }

    async fn checkout_completed(
        &self,
        txn: &mut dyn StoreTransaction,
        session: &CheckoutSessionObject,
    ) -> Result<Applied, BillingError> {
        let Some(pending) = Self::locked_subscription(txn, &session.id).await? else {
            tracing::warn!(
                "Checkout completed for unknown session, ignoring: session_id={}",
                session.id
            );
            return Ok(Applied::default());
        };
        if pending.status != SubscriptionStatus::Pending {
            tracing::info!(
                "Checkout session already reconciled: session_id={}, status={}",
                session.id,
                pending.status
            );
            return Ok(Applied::default());
        }

        let user_id = pending.user_id;
        let mut user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::Internal("Subscription owner missing".to_string()))?;
        let plan = txn
            .get_plan(pending.plan_id)
            .await?
            .ok_or_else(|| BillingError::Internal("Subscription plan missing".to_string()))?;

        let now = Utc::now();
        let superseded = cancel_current(txn, user_id, Some(pending.id), now).await?;

        let mut activated = transition(
            txn,
            &pending,
            SubscriptionStatus::Active,
            Some(one_month_from(now)),
        )
        .await?;
        activated.payment_status = PaymentStatus::Paid;
        activated.start_date = now;
        if let Some(provider_subscription) = &session.subscription {
            activated.external_id = provider_subscription.clone();
        }
        let activated = txn.update_subscription(&activated).await?;

        ledger::reset(
            txn,
            &mut user,
            plan.credits_per_month,
            LedgerContext::new(
                PaymentMethod::Stripe,
                format!("{} plan monthly credits", plan.name),
            )
            .with_subscription(activated.id),
        )
        .await?;

        tracing::info!(
            "Subscription activated from checkout: user_id={}, subscription_id={}, plan={}, superseded={}",
            user_id,
            activated.id,
            plan.name,
            superseded.len()
        );

        Ok(Applied {
            notification: Some((user_id, state_event(txn, user_id).await?)),
            superseded,
        })
    }

    async fn checkout_expired(
        &self,
        txn: &mut dyn StoreTransaction,
        session: &CheckoutSessionObject,
    ) -> Result<Applied, BillingError> {
        let Some(pending) = Self::locked_subscription(txn, &session.id).await? else {
            tracing::debug!("Expired checkout for unknown session: session_id={}", session.id);
            return Ok(Applied::default());
        };
        if pending.status != SubscriptionStatus::Pending {
            return Ok(Applied::default());
        }

        transition(
            txn,
            &pending,
            SubscriptionStatus::Canceled,
            Some(Utc::now()),
        )
        .await?;
        tracing::info!(
            "Abandoned checkout canceled: user_id={}, session_id={}",
            pending.user_id,
            session.id
        );
        Ok(Applied::default())
    }

    async fn subscription_updated(
        &self,
        txn: &mut dyn StoreTransaction,
        object: &SubscriptionObject,
    ) -> Result<Applied, BillingError> {
        let Some(subscription) = Self::locked_subscription(txn, &object.id).await? else {
            tracing::info!(
                "Subscription update for unknown subscription, ignoring: external_id={}",
                object.id
            );
            return Ok(Applied::default());
        };

        let change = upstream_change(object, Utc::now());
        let mut updated = subscription.clone();

        if let Some(next) = change.status {
            if next != subscription.status {
                if !subscription.status.can_transition_to(next) {
                    tracing::warn!(
                        "Ignoring disallowed upstream transition: subscription_id={}, from={}, to={}, upstream_status={}",
                        subscription.id,
                        subscription.status,
                        next,
                        object.status
                    );
                    return Ok(Applied::default());
                }
                updated.status = next;
            }
        }
        if let Some(payment_status) = change.payment_status {
            updated.payment_status = payment_status;
        }
        if change.end_date.is_some() {
            updated.end_date = change.end_date;
        }

        if updated == subscription {
            tracing::debug!(
                "Subscription update carries no local change: subscription_id={}",
                subscription.id
            );
            return Ok(Applied::default());
        }

        let updated = txn.update_subscription(&updated).await?;
        tracing::info!(
            "Subscription synced from provider: subscription_id={}, status={}, payment_status={}",
            updated.id,
            updated.status,
            updated.payment_status
        );

        let user_id = updated.user_id;
        Ok(Applied {
            notification: Some((user_id, state_event(txn, user_id).await?)),
            superseded: Vec::new(),
        })
    }

    async fn subscription_deleted(
        &self,
        txn: &mut dyn StoreTransaction,
        object: &SubscriptionObject,
    ) -> Result<Applied, BillingError> {
        let Some(subscription) = Self::locked_subscription(txn, &object.id).await? else {
            tracing::info!(
                "Subscription deletion for unknown subscription, ignoring: external_id={}",
                object.id
            );
            return Ok(Applied::default());
        };
        if !subscription
            .status
            .can_transition_to(SubscriptionStatus::Canceled)
        {
            tracing::debug!(
                "Subscription already terminal: subscription_id={}, status={}",
                subscription.id,
                subscription.status
            );
            return Ok(Applied::default());
        }

        transition(
            txn,
            &subscription,
            SubscriptionStatus::Canceled,
            Some(Utc::now()),
        )
        .await?;

        let user_id = subscription.user_id;
        Ok(Applied {
            notification: Some((user_id, state_event(txn, user_id).await?)),
            superseded: Vec::new(),
        })
    }
}

#[async_trait]
impl WebhookService for WebhookServiceImpl {
    async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, BillingError> {
        self.verifier.verify(payload, signature)?;
        let parsed = parse_event(payload)?;

        tracing::info!(
            "Processing verified webhook: event_id={}, type={}",
            parsed.id,
            parsed.event_type
        );

        let key = EventDeduplicator::key(&parsed.event_type, &parsed.id);
        let outcome = |skipped| WebhookOutcome {
            received: true,
            event_id: parsed.id.clone(),
            event_type: parsed.event_type.clone(),
            skipped,
        };

        if !self.dedup.try_claim(&key) {
            tracing::info!("Duplicate webhook skipped: key={}", key);
            return Ok(outcome(true));
        }

        let applied = match self.apply(&parsed).await {
            Ok(applied) => applied,
            Err(e) if matches!(parsed.event, WebhookEvent::Invoice) => {
                // No effects to retry, so the acknowledgement stands
                tracing::warn!(
                    "Failed to record invoice webhook, acknowledging anyway: event_id={}, type={}, error={}",
                    parsed.id,
                    parsed.event_type,
                    e
                );
                return Ok(outcome(false));
            }
            Err(e) => {
                tracing::error!(
                    "Webhook processing failed: event_id={}, type={}, error={}",
                    parsed.id,
                    parsed.event_type,
                    e
                );
                self.dedup.release(&key);
                return Err(e);
            }
        };

        let Some(applied) = applied else {
            return Ok(outcome(true));
        };

        for subscription in applied
            .superseded
            .iter()
            .filter(|s| s.has_provider_subscription())
        {
            if let Err(e) = self
                .payment_provider
                .cancel_subscription(&subscription.external_id)
                .await
            {
                tracing::warn!(
                    "Failed to cancel superseded subscription upstream: subscription_id={}, error={}",
                    subscription.id,
                    e
                );
            }
        }
        if let Some((user_id, event)) = applied.notification {
            self.notifier.publish(user_id, event);
        }

        tracing::info!(
            "Webhook processed successfully: event_id={}, type={}",
            parsed.id,
            parsed.event_type
        );
        Ok(outcome(false))
    }
}
