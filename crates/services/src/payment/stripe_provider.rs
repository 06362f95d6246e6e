use async_trait::async_trait;
use stripe::{
    CancelSubscription, CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, Subscription as StripeSubscription,
    SubscriptionId as StripeSubscriptionId, UpdateSubscription,
};

use super::ports::{CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider};

/// [`PaymentProvider`] backed by the Stripe API
pub struct StripePaymentProvider {
    secret_key: String,
}

impl StripePaymentProvider {
    pub fn new(secret_key: String) -> Self {
        Self { secret_key }
    }

    fn client(&self) -> Result<Client, PaymentError> {
        if self.secret_key.is_empty() {
            return Err(PaymentError::NotConfigured);
        }
        Ok(Client::new(&self.secret_key))
    }

    fn parse_subscription_id(external_id: &str) -> Result<StripeSubscriptionId, PaymentError> {
        external_id
            .parse()
            .map_err(|_| PaymentError::InvalidId(external_id.to_string()))
    }
}

#[async_trait]
impl PaymentProvider for StripePaymentProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let client = self.client()?;
        let user_id = request.user_id.to_string();

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer_email = Some(&request.email);
        params.client_reference_id = Some(&user_id);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.metadata = Some(
            [
                ("user_id".to_string(), user_id.clone()),
                ("plan_id".to_string(), request.plan_id.to_string()),
            ]
            .into_iter()
            .collect(),
        );
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = StripeCheckoutSession::create(&client, params)
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::Provider("No checkout URL returned".to_string()))?;

        tracing::info!(
            "Stripe checkout session created: user_id={}, session_id={}",
            request.user_id,
            session.id
        );

        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            url,
        })
    }

    async fn cancel_subscription(&self, external_id: &str) -> Result<(), PaymentError> {
        let client = self.client()?;
        let subscription_id = Self::parse_subscription_id(external_id)?;

        StripeSubscription::cancel(&client, &subscription_id, CancelSubscription::default())
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        tracing::info!("Stripe subscription canceled: subscription_id={}", external_id);
        Ok(())
    }

    async fn set_auto_renew(&self, external_id: &str, enabled: bool) -> Result<(), PaymentError> {
        let client = self.client()?;
        let subscription_id = Self::parse_subscription_id(external_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(!enabled),
            ..Default::default()
        };
        StripeSubscription::update(&client, &subscription_id, params)
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        tracing::info!(
            "Stripe auto-renew updated: subscription_id={}, enabled={}",
            external_id,
            enabled
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlanId, UserId};

    #[tokio::test]
    async fn test_unconfigured_provider_fails_without_network() {
        let provider = StripePaymentProvider::new(String::new());
        let err = provider.set_auto_renew("sub_123", false).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotConfigured));

        let err = provider
            .create_checkout_session(CheckoutRequest {
                user_id: UserId::new(),
                email: "a@example.com".into(),
                plan_id: PlanId::new(),
                price_id: "price_1".into(),
                success_url: "https://app.test/ok".into(),
                cancel_url: "https://app.test/cancel".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotConfigured));
    }

    #[tokio::test]
    async fn test_invalid_subscription_id_is_rejected() {
        let provider = StripePaymentProvider::new("sk_test_123".into());
        let err = provider.cancel_subscription("free_tier").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidId(id) if id == "free_tier"));
    }
}
