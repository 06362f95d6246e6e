//! In-memory implementations of the storage and payment ports, plus a fully
//! wired service graph, for unit and API tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::auth::{SessionRepository, UserSession};
use crate::chat::{Chat, ChatMessage, ChatRepository, ChatService, ChatServiceImpl, NewChatMessage};
use crate::credits::{
    CreditTransaction, CreditTransactionRepository, CreditsService, CreditsServiceImpl,
    ModelRates, NewCreditTransaction,
};
use crate::notifier::NotifierRegistry;
use crate::payment::{CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider};
use crate::plan::{Plan, PlanRepository, FREE_PLAN_NAME};
use crate::store::{NewPaymentWebhook, Store, StoreTransaction};
use crate::subscription::lifecycle::one_month_from;
use crate::subscription::{
    NewSubscription, PaymentStatus, Subscription, SubscriptionRepository, SubscriptionService,
    SubscriptionServiceConfig, SubscriptionServiceImpl, SubscriptionStatus,
};
use crate::types::{
    ChatId, ChatMessageId, CreditTransactionId, PlanId, SessionId, SubscriptionId, UserId,
};
use crate::user::{User, UserIdentity, UserRepository, UserService, UserServiceImpl};
use crate::webhook::{sign_payload, WebhookService, WebhookServiceConfig, WebhookServiceImpl};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Signature header for `payload` signed now with [`WEBHOOK_SECRET`]
pub fn signed_webhook(payload: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), payload)
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    plans: Vec<Plan>,
    subscriptions: Vec<Subscription>,
    credit_transactions: Vec<CreditTransaction>,
    chats: Vec<Chat>,
    chat_messages: Vec<ChatMessage>,
    webhooks: HashSet<(String, String)>,
    sessions: HashMap<String, UserSession>,
}

impl MemoryState {
    fn current_subscriptions(&self, user_id: UserId) -> Vec<Subscription> {
        let mut current: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status.is_current())
            .cloned()
            .collect();
        current.sort_by(|a, b| {
            b.start_date
                .cmp(&a.start_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        current
    }

    fn live_chat(&self, chat_id: ChatId, user_id: UserId) -> Option<Chat> {
        self.chats
            .iter()
            .find(|c| c.id == chat_id && c.user_id == user_id && !c.is_deleted)
            .cloned()
    }
}

/// Store backed by process memory. Transactions work on a copy of the state
/// and are serialized by a writer lock, so a dropped transaction leaves no trace.
#[derive(Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the Free, Starter and Pro plans
    pub fn with_default_plans() -> Self {
        let store = Self::new();
        {
            let mut state = store.write();
            state.plans = vec![
                Plan {
                    id: PlanId::new(),
                    name: FREE_PLAN_NAME.to_string(),
                    price: Decimal::ZERO,
                    credits_per_month: dec!(5),
                    external_price_id: None,
                },
                Plan {
                    id: PlanId::new(),
                    name: "Starter".to_string(),
                    price: dec!(10),
                    credits_per_month: dec!(1000),
                    external_price_id: Some("price_starter".to_string()),
                },
                Plan {
                    id: PlanId::new(),
                    name: "Pro".to_string(),
                    price: dec!(30),
                    credits_per_month: dec!(5000),
                    external_price_id: Some("price_pro".to_string()),
                },
            ];
        }
        store
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next transaction commit fail (and roll back)
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn seed_user(&self, email: &str, credits: Decimal) -> UserId {
        let _guard = self.writer.lock().await;
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            credits_remaining: credits,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.write().users.insert(id, user);
        id
    }

    /// Insert a subscription row directly, bypassing the state machine
    pub async fn seed_subscription(
        &self,
        user_id: UserId,
        plan_name: &str,
        status: SubscriptionStatus,
        payment_status: PaymentStatus,
        external_id: &str,
    ) -> Subscription {
        let plan = self.plan_named(plan_name).await;
        let _guard = self.writer.lock().await;
        let now = Utc::now();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            user_id,
            plan_id: plan.id,
            status,
            payment_status,
            external_id: external_id.to_string(),
            start_date: now,
            end_date: Some(one_month_from(now)),
            created_at: now,
            updated_at: now,
        };
        self.write().subscriptions.push(subscription.clone());
        subscription
    }

    /// Register a session for `token` (stored by hash, as the auth middleware looks it up)
    pub async fn seed_session(&self, token: &str, user_id: UserId, email: &str) -> UserSession {
        let now = Utc::now();
        let session = UserSession {
            session_id: SessionId::new(),
            user_id,
            email: email.to_string(),
            created_at: now,
            expires_at: now + ChronoDuration::days(1),
        };
        let hash = format!("{:x}", Sha256::digest(token.as_bytes()));
        self.write().sessions.insert(hash, session.clone());
        session
    }

    pub async fn plan_named(&self, name: &str) -> Plan {
        self.read()
            .plans
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("plan {} not seeded", name))
    }

    pub async fn user(&self, user_id: UserId) -> Option<User> {
        self.read().users.get(&user_id).cloned()
    }

    /// Subscriptions of the user in insertion order
    pub async fn subscriptions_for(&self, user_id: UserId) -> Vec<Subscription> {
        self.read()
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Ledger rows of the user in insertion order
    pub async fn credit_transactions_for(&self, user_id: UserId) -> Vec<CreditTransaction> {
        self.read()
            .credit_transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn recorded_webhooks(&self) -> usize {
        self.read().webhooks.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let working = self.read().clone();
        Ok(Box::new(InMemoryTransaction {
            working,
            shared: Arc::clone(&self.state),
            fail_commit: Arc::clone(&self.fail_next_commit),
            _guard: guard,
        }))
    }
}

pub struct InMemoryTransaction {
    working: MemoryState,
    shared: Arc<RwLock<MemoryState>>,
    fail_commit: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_user(&mut self, user_id: UserId) -> anyhow::Result<Option<User>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn set_user_credits(&mut self, user_id: UserId, credits: Decimal) -> anyhow::Result<()> {
        if credits.is_sign_negative() {
            anyhow::bail!("credits_remaining must not be negative");
        }
        let user = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow::anyhow!("User not found"))?;
        user.credits_remaining = credits;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn get_plan(&mut self, plan_id: PlanId) -> anyhow::Result<Option<Plan>> {
        Ok(self.working.plans.iter().find(|p| p.id == plan_id).cloned())
    }

    async fn get_plan_by_name(&mut self, name: &str) -> anyhow::Result<Option<Plan>> {
        Ok(self.working.plans.iter().find(|p| p.name == name).cloned())
    }

    async fn get_current_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<Subscription>> {
        Ok(self.working.current_subscriptions(user_id))
    }

    async fn get_latest_subscription_with_status(
        &mut self,
        user_id: UserId,
        status: SubscriptionStatus,
    ) -> anyhow::Result<Option<Subscription>> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.status == status)
            .max_by_key(|s| (s.start_date, s.created_at))
            .cloned())
    }

    async fn find_subscription_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<Subscription>> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .rev()
            .find(|s| s.external_id == external_id)
            .cloned())
    }

    async fn insert_subscription(
        &mut self,
        subscription: NewSubscription,
    ) -> anyhow::Result<Subscription> {
        let now = Utc::now();
        let row = Subscription {
            id: SubscriptionId::new(),
            user_id: subscription.user_id,
            plan_id: subscription.plan_id,
            status: subscription.status,
            payment_status: subscription.payment_status,
            external_id: subscription.external_id,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            created_at: now,
            updated_at: now,
        };
        self.working.subscriptions.push(row.clone());
        Ok(row)
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> anyhow::Result<Subscription> {
        let row = self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| anyhow::anyhow!("Subscription not found"))?;
        row.status = subscription.status;
        row.payment_status = subscription.payment_status;
        row.external_id = subscription.external_id.clone();
        row.start_date = subscription.start_date;
        row.end_date = subscription.end_date;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn insert_credit_transaction(
        &mut self,
        transaction: NewCreditTransaction,
    ) -> anyhow::Result<CreditTransaction> {
        let row = CreditTransaction {
            id: CreditTransactionId::new(),
            user_id: transaction.user_id,
            subscription_id: transaction.subscription_id,
            credits_added: transaction.credits_added,
            credits_deducted: transaction.credits_deducted,
            payment_method: transaction.payment_method,
            description: transaction.description,
            created_at: Utc::now(),
        };
        self.working.credit_transactions.push(row.clone());
        Ok(row)
    }

    async fn record_webhook(&mut self, webhook: NewPaymentWebhook) -> anyhow::Result<bool> {
        Ok(self
            .working
            .webhooks
            .insert((webhook.provider, webhook.event_id)))
    }

    async fn get_chat(&mut self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<Option<Chat>> {
        Ok(self.working.live_chat(chat_id, user_id))
    }

    async fn insert_chat_message(
        &mut self,
        message: NewChatMessage,
    ) -> anyhow::Result<ChatMessage> {
        let row = ChatMessage {
            id: ChatMessageId::new(),
            chat_id: message.chat_id,
            user_id: message.user_id,
            role: message.role,
            content: message.content,
            model: message.model,
            prompt_tokens: message.prompt_tokens,
            completion_tokens: message.completion_tokens,
            credits_used: message.credits_used,
            created_at: Utc::now(),
        };
        self.working.chat_messages.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            anyhow::bail!("simulated commit failure");
        }
        let InMemoryTransaction {
            working, shared, ..
        } = *self;
        *shared
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = working;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<User>> {
        Ok(self.read().users.get(&user_id).cloned())
    }

    async fn create_user(&self, identity: &UserIdentity) -> anyhow::Result<User> {
        let _guard = self.writer.lock().await;
        let now = Utc::now();
        let mut state = self.write();
        let user = state
            .users
            .entry(identity.user_id)
            .or_insert_with(|| User {
                id: identity.user_id,
                email: identity.email.clone(),
                credits_remaining: Decimal::ZERO,
                created_at: now,
                updated_at: now,
            });
        Ok(user.clone())
    }
}

#[async_trait]
impl PlanRepository for InMemoryStore {
    async fn list_plans(&self) -> anyhow::Result<Vec<Plan>> {
        let mut plans = self.read().plans.clone();
        plans.sort_by(|a, b| a.price.cmp(&b.price));
        Ok(plans)
    }

    async fn get_plan(&self, plan_id: PlanId) -> anyhow::Result<Option<Plan>> {
        Ok(self.read().plans.iter().find(|p| p.id == plan_id).cloned())
    }

    async fn get_plan_by_name(&self, name: &str) -> anyhow::Result<Option<Plan>> {
        Ok(self.read().plans.iter().find(|p| p.name == name).cloned())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn get_current_subscriptions(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<Subscription>> {
        Ok(self.read().current_subscriptions(user_id))
    }

    async fn get_user_subscriptions(&self, user_id: UserId) -> anyhow::Result<Vec<Subscription>> {
        let mut subscriptions = self.subscriptions_for(user_id).await;
        subscriptions.reverse();
        Ok(subscriptions)
    }

    async fn has_any_subscription(&self, user_id: UserId) -> anyhow::Result<bool> {
        Ok(self
            .read()
            .subscriptions
            .iter()
            .any(|s| s.user_id == user_id))
    }
}

#[async_trait]
impl CreditTransactionRepository for InMemoryStore {
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> anyhow::Result<Vec<CreditTransaction>> {
        let mut rows = self.credit_transactions_for(user_id).await;
        rows.reverse();
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn sum_net_credits(&self, user_id: UserId) -> anyhow::Result<Decimal> {
        Ok(self
            .credit_transactions_for(user_id)
            .await
            .iter()
            .map(CreditTransaction::net)
            .sum())
    }
}

#[async_trait]
impl ChatRepository for InMemoryStore {
    async fn create_chat(
        &self,
        user_id: UserId,
        title: String,
        model: String,
    ) -> anyhow::Result<Chat> {
        let _guard = self.writer.lock().await;
        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            user_id,
            title,
            model,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.write().chats.push(chat.clone());
        Ok(chat)
    }

    async fn list_chats(&self, user_id: UserId) -> anyhow::Result<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .read()
            .chats
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id && !c.is_deleted)
            .cloned()
            .collect();
        // stable: equal timestamps keep newest-inserted first
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    async fn get_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<Option<Chat>> {
        Ok(self.read().live_chat(chat_id, user_id))
    }

    async fn soft_delete_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<bool> {
        let _guard = self.writer.lock().await;
        let mut state = self.write();
        match state
            .chats
            .iter_mut()
            .find(|c| c.id == chat_id && c.user_id == user_id && !c.is_deleted)
        {
            Some(chat) => {
                chat.is_deleted = true;
                chat.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_messages(&self, chat_id: ChatId) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(self
            .read()
            .chat_messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<UserSession>> {
        Ok(self.read().sessions.get(&token_hash).cloned())
    }
}

/// Outbound payment call captured by [`MockPaymentProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCall {
    Checkout {
        user_id: UserId,
        price_id: String,
        success_url: String,
        cancel_url: String,
    },
    Cancel(String),
    AutoRenew(String, bool),
}

/// Records payment calls; each kind of call can be switched to fail
#[derive(Default)]
pub struct MockPaymentProvider {
    calls: Mutex<Vec<PaymentCall>>,
    sessions: AtomicUsize,
    fail_checkout: AtomicBool,
    fail_cancel: AtomicBool,
    fail_auto_renew: AtomicBool,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn fail_auto_renew(&self, fail: bool) {
        self.fail_auto_renew.store(fail, Ordering::SeqCst);
    }

    /// Successful calls in order
    pub fn calls(&self) -> Vec<PaymentCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, call: PaymentCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("checkout unavailable".to_string()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(PaymentCall::Checkout {
            user_id: request.user_id,
            price_id: request.price_id,
            success_url: request.success_url,
            cancel_url: request.cancel_url,
        });
        let session_id = format!("cs_test_{}", n);
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.test/{}", session_id),
            session_id,
        })
    }

    async fn cancel_subscription(&self, external_id: &str) -> Result<(), PaymentError> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("cancel unavailable".to_string()));
        }
        self.record(PaymentCall::Cancel(external_id.to_string()));
        Ok(())
    }

    async fn set_auto_renew(&self, external_id: &str, enabled: bool) -> Result<(), PaymentError> {
        if self.fail_auto_renew.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("update unavailable".to_string()));
        }
        self.record(PaymentCall::AutoRenew(external_id.to_string(), enabled));
        Ok(())
    }
}

/// All services wired over one [`InMemoryStore`]
pub struct TestContext {
    pub store: Arc<InMemoryStore>,
    pub payments: Arc<MockPaymentProvider>,
    pub notifier: Arc<NotifierRegistry>,
    pub subscriptions: Arc<dyn SubscriptionService>,
    pub webhooks: Arc<dyn WebhookService>,
    pub credits: Arc<dyn CreditsService>,
    pub chats: Arc<dyn ChatService>,
    pub users: Arc<dyn UserService>,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::with_default_plans());
        let payments = Arc::new(MockPaymentProvider::new());
        let notifier = Arc::new(NotifierRegistry::new());

        let subscriptions: Arc<dyn SubscriptionService> =
            Arc::new(SubscriptionServiceImpl::new(SubscriptionServiceConfig {
                store: store.clone(),
                plan_repository: store.clone(),
                subscription_repository: store.clone(),
                user_repository: store.clone(),
                payment_provider: payments.clone(),
                notifier: notifier.clone(),
                free_plan_name: FREE_PLAN_NAME.to_string(),
                success_url: "https://app.test/success".to_string(),
                cancel_url: "https://app.test/cancel".to_string(),
            }));
        let webhooks: Arc<dyn WebhookService> =
            Arc::new(WebhookServiceImpl::new(WebhookServiceConfig {
                store: store.clone(),
                payment_provider: payments.clone(),
                notifier: notifier.clone(),
                webhook_secret: WEBHOOK_SECRET.to_string(),
                signature_tolerance_secs: 300,
                dedup_window: Duration::from_secs(5),
            }));
        let credits: Arc<dyn CreditsService> = Arc::new(CreditsServiceImpl::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let chats: Arc<dyn ChatService> = Arc::new(ChatServiceImpl::new(
            store.clone(),
            store.clone(),
            store.clone(),
            ModelRates::default(),
        ));
        let users: Arc<dyn UserService> = Arc::new(UserServiceImpl::new(
            store.clone(),
            store.clone(),
            subscriptions.clone(),
        ));

        Self {
            store,
            payments,
            notifier,
            subscriptions,
            webhooks,
            credits,
            chats,
            users,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryStore::with_default_plans();
        let user_id = store.seed_user("tx@example.com", Decimal::ZERO).await;

        {
            let mut txn = store.begin().await.unwrap();
            txn.set_user_credits(user_id, dec!(9)).await.unwrap();
        }
        assert_eq!(store.user(user_id).await.unwrap().credits_remaining, Decimal::ZERO);

        let mut txn = store.begin().await.unwrap();
        txn.set_user_credits(user_id, dec!(9)).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(store.user(user_id).await.unwrap().credits_remaining, dec!(9));
    }

    #[tokio::test]
    async fn test_negative_balance_is_rejected() {
        let store = InMemoryStore::with_default_plans();
        let user_id = store.seed_user("neg@example.com", Decimal::ZERO).await;
        let mut txn = store.begin().await.unwrap();
        assert!(txn.set_user_credits(user_id, dec!(-1)).await.is_err());
    }
}
