use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chat Billing API",
        description = "Subscriptions, credits and chat history for the chat application.",
        version = "1.0.0",
        license(name = "MIT",)
    ),
    paths(
        crate::routes::health_check,
        // Subscription endpoints
        crate::routes::subscriptions::create_checkout,
        crate::routes::subscriptions::cancel_subscription,
        crate::routes::subscriptions::restore_subscription,
        crate::routes::subscriptions::schedule_downgrade,
        crate::routes::subscriptions::get_current_subscription,
        crate::routes::subscriptions::list_plans,
        crate::sse::subscription_events,
        // Webhook endpoints
        crate::routes::webhooks::handle_stripe_webhook,
        // Credit endpoints
        crate::routes::credits::get_credits,
        // Chat endpoints
        crate::routes::chats::list_chats,
        crate::routes::chats::create_chat,
        crate::routes::chats::get_chat,
        crate::routes::chats::delete_chat,
        crate::routes::chats::list_messages,
        crate::routes::chats::authorize_message,
        crate::routes::chats::record_exchange,
        // User endpoints
        crate::routes::users::get_current_user,
    ),
    components(schemas(
        crate::error::ApiErrorResponse,
        crate::routes::HealthResponse,
        crate::routes::subscriptions::CheckoutRequest,
        crate::routes::subscriptions::CheckoutResponse,
        crate::routes::subscriptions::CancelSubscriptionResponse,
        crate::routes::subscriptions::ListPlansResponse,
        crate::routes::chats::CreateChatRequest,
        crate::routes::chats::ListChatsResponse,
        crate::routes::chats::ChatHistoryResponse,
        crate::routes::chats::RecordExchangeRequest,
        crate::routes::chats::AuthorizeMessageResponse,
        crate::routes::users::UserProfileResponse,
        services::plan::Plan,
        services::subscription::SubscriptionView,
        services::subscription::SubscriptionStatus,
        services::subscription::PaymentStatus,
        services::credits::CreditsSummary,
        services::credits::CreditTransaction,
        services::credits::PaymentMethod,
        services::credits::TokenUsage,
        services::chat::Chat,
        services::chat::ChatMessage,
        services::chat::ChatRole,
        services::chat::RecordedExchange,
        services::webhook::WebhookOutcome,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Subscriptions", description = "Plan checkout, cancellation, downgrade and live updates"),
        (name = "Webhooks", description = "Payment provider callbacks"),
        (name = "Credits", description = "Credit balance and ledger"),
        (name = "Chats", description = "Chat sessions and metered history"),
        (name = "Users", description = "User profile endpoints")
    )
)]
pub struct ApiDoc;

/// Security scheme addon for Bearer token authentication
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("session_token")
                        .description(Some("Session token issued by the identity provider"))
                        .build(),
                ),
            )
        }
    }
}
