use api::{create_router_with_cors, AppState};
use services::{
    chat::ChatServiceImpl,
    credits::{CreditsServiceImpl, ModelRates},
    notifier::NotifierRegistry,
    payment::StripePaymentProvider,
    subscription::{SubscriptionServiceConfig, SubscriptionServiceImpl},
    user::UserServiceImpl,
    webhook::{WebhookServiceConfig, WebhookServiceImpl},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const BUILTIN_DEFAULT_RATE: (&str, &str) = ("0.0003", "0.0015");

/// Rate table from configuration; falls back to the built-in table when nothing is configured
fn model_rates(billing: &config::BillingConfig) -> anyhow::Result<ModelRates> {
    if billing.model_rates.is_empty()
        && billing.default_input_rate.is_none()
        && billing.default_output_rate.is_none()
    {
        return Ok(ModelRates::default());
    }

    let default_rate = (
        billing
            .default_input_rate
            .as_deref()
            .unwrap_or(BUILTIN_DEFAULT_RATE.0),
        billing
            .default_output_rate
            .as_deref()
            .unwrap_or(BUILTIN_DEFAULT_RATE.1),
    );
    ModelRates::from_strings(
        billing
            .model_rates
            .iter()
            .map(|r| (r.model.as_str(), r.input.as_str(), r.output.as_str())),
        default_rate,
    )
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
        eprintln!("Continuing with environment variables...");
    }

    // Load configuration from environment
    let config = config::Config::from_env();
    init_tracing(&config.logging);

    tracing::info!("Starting API server...");
    tracing::info!(
        "Database: {}:{}/{}",
        config.database.host.as_deref().unwrap_or("localhost"),
        config.database.port,
        config.database.database
    );
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    if !config.stripe.is_configured() {
        tracing::warn!("Stripe is not configured; checkout and webhooks will fail");
    }

    // Create database and run migrations
    tracing::info!("Connecting to database...");
    let db = database::Database::from_config(&config.database).await?;

    tracing::info!("Running migrations...");
    db.run_migrations().await?;
    db.sync_plan_prices(&config.stripe.price_ids).await?;

    // Create services
    tracing::info!("Initializing services...");
    let notifier = Arc::new(NotifierRegistry::new());
    let payment_provider = Arc::new(StripePaymentProvider::new(
        config.stripe.secret_key.clone(),
    ));

    let subscription_service = Arc::new(SubscriptionServiceImpl::new(SubscriptionServiceConfig {
        store: db.store.clone(),
        plan_repository: db.plans.clone(),
        subscription_repository: db.subscriptions.clone(),
        user_repository: db.users.clone(),
        payment_provider: payment_provider.clone(),
        notifier: notifier.clone(),
        free_plan_name: config.billing.free_plan_name.clone(),
        success_url: config.stripe.success_url.to_string(),
        cancel_url: config.stripe.cancel_url.to_string(),
    }));

    let webhook_service = Arc::new(WebhookServiceImpl::new(WebhookServiceConfig {
        store: db.store.clone(),
        payment_provider,
        notifier: notifier.clone(),
        webhook_secret: config.stripe.webhook_secret.clone(),
        signature_tolerance_secs: config.billing.webhook_tolerance_secs,
        dedup_window: Duration::from_secs(config.billing.webhook_dedup_window_secs),
    }));

    let credits_service = Arc::new(CreditsServiceImpl::new(
        db.store.clone(),
        db.users.clone(),
        db.credit_transactions.clone(),
    ));

    let chat_service = Arc::new(ChatServiceImpl::new(
        db.store.clone(),
        db.chats.clone(),
        db.users.clone(),
        model_rates(&config.billing)?,
    ));

    let user_service = Arc::new(UserServiceImpl::new(
        db.users.clone(),
        db.subscriptions.clone(),
        subscription_service.clone(),
    ));

    // Create application state
    let app_state = AppState {
        subscription_service,
        webhook_service,
        credits_service,
        chat_service,
        user_service,
        session_repository: db.sessions.clone(),
        notifier,
        sse_heartbeat: Duration::from_secs(config.billing.sse_heartbeat_secs),
    };

    let app = create_router_with_cors(app_state, config.cors.clone());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("OpenAPI document available at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
