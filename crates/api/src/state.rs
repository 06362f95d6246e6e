use std::sync::Arc;
use std::time::Duration;

use services::notifier::NotifierRegistry;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub subscription_service: Arc<dyn services::subscription::SubscriptionService>,
    pub webhook_service: Arc<dyn services::webhook::WebhookService>,
    pub credits_service: Arc<dyn services::credits::CreditsService>,
    pub chat_service: Arc<dyn services::chat::ChatService>,
    pub user_service: Arc<dyn services::user::UserService>,
    pub session_repository: Arc<dyn services::auth::SessionRepository>,
    /// Live SSE channels keyed by user
    pub notifier: Arc<NotifierRegistry>,
    /// Interval between SSE heartbeat comments
    pub sse_heartbeat: Duration,
}
