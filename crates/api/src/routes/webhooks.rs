use crate::{error::ApiError, state::AppState};
use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use services::webhook::WebhookOutcome;

/// Handle Stripe webhook events (public endpoint - no auth required)
///
/// The raw body is verified against the `Stripe-Signature` header before it is parsed.
#[utoipa::path(
    post,
    path = "/v1/webhooks/stripe",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookOutcome),
        (status = 400, description = "Invalid signature or payload", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn handle_stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, ApiError> {
    tracing::info!("Received Stripe webhook: bytes={}", body.len());

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let outcome = app_state
        .webhook_service
        .handle_stripe_webhook(&body, signature)
        .await?;

    tracing::info!(
        "Processed Stripe webhook: event_id={}, type={}, skipped={}",
        outcome.event_id,
        outcome.event_type,
        outcome.skipped
    );
    Ok(Json(outcome))
}

/// Create public webhook router (no auth)
pub fn create_webhooks_router() -> Router<AppState> {
    Router::new().route("/v1/webhooks/stripe", post(handle_stripe_webhook))
}
