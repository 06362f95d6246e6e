use crate::{error::ApiError, middleware::AuthenticatedUser, sse, state::AppState};
use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use services::plan::Plan;
use services::subscription::SubscriptionView;
use services::PlanId;
use url::Url;
use utoipa::ToSchema;

/// Request to start a checkout for a paid plan
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Plan to subscribe to
    pub plan_id: PlanId,
    /// URL to redirect after successful checkout; defaults to the configured URL
    #[serde(default)]
    pub success_url: Option<String>,
    /// URL to redirect after cancelled checkout; defaults to the configured URL
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// Response containing the checkout redirect URL
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelSubscriptionResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListPlansResponse {
    /// Plans ordered by price
    pub plans: Vec<Plan>,
}

/// Validates that a URL is valid and secure for checkout redirects.
/// Requires https. Allows http only for localhost/127.0.0.1 (development).
fn validate_redirect_url(url_str: &str, field_name: &str) -> Result<(), ApiError> {
    let url = Url::parse(url_str).map_err(|_| {
        ApiError::bad_request(format!(
            "Invalid {}: must be a valid URL (e.g., https://example.com/success)",
            field_name
        ))
    })?;
    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            let host_ok = url
                .host_str()
                .map(|h| h == "localhost" || h == "127.0.0.1")
                .unwrap_or(false);
            if host_ok {
                Ok(())
            } else {
                Err(ApiError::bad_request(format!(
                    "Invalid {}: URL must use https for non-localhost addresses",
                    field_name
                )))
            }
        }
        _ => Err(ApiError::bad_request(format!(
            "Invalid {}: URL scheme must be https (or http for localhost/127.0.0.1 only)",
            field_name
        ))),
    }
}

/// Create a checkout session for a paid plan
#[utoipa::path(
    post,
    path = "/v1/subscriptions/checkout",
    tag = "Subscriptions",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Invalid plan or redirect URL", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Plan not found", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn create_checkout(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    tracing::info!(
        "Creating checkout for user_id={}, plan_id={}",
        user.user_id,
        req.plan_id
    );

    if let Some(success_url) = req.success_url.as_deref() {
        validate_redirect_url(success_url, "successUrl")?;
    }
    if let Some(cancel_url) = req.cancel_url.as_deref() {
        validate_redirect_url(cancel_url, "cancelUrl")?;
    }

    let url = app_state
        .subscription_service
        .create_checkout(&user.identity(), req.plan_id, req.success_url, req.cancel_url)
        .await?;

    Ok(Json(CheckoutResponse { url }))
}

/// Cancel every current subscription and zero the balance
#[utoipa::path(
    post,
    path = "/v1/subscriptions/cancel",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Subscription canceled", body = CancelSubscriptionResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No current subscription", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn cancel_subscription(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CancelSubscriptionResponse>, ApiError> {
    tracing::info!("Canceling subscription for user_id={}", user.user_id);

    app_state
        .subscription_service
        .cancel_subscription(user.user_id)
        .await?;

    Ok(Json(CancelSubscriptionResponse { success: true }))
}

/// Undo a scheduled downgrade
#[utoipa::path(
    post,
    path = "/v1/subscriptions/restore",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Subscription restored", body = SubscriptionView),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No subscription pending downgrade", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn restore_subscription(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SubscriptionView>, ApiError> {
    tracing::info!("Restoring subscription for user_id={}", user.user_id);

    let view = app_state
        .subscription_service
        .restore_subscription(user.user_id)
        .await?;

    Ok(Json(view))
}

/// Schedule the current paid subscription to end at the period boundary
#[utoipa::path(
    post,
    path = "/v1/subscriptions/downgrade",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Downgrade scheduled", body = SubscriptionView),
        (status = 400, description = "Subscription cannot be downgraded", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No active paid subscription", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn schedule_downgrade(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SubscriptionView>, ApiError> {
    tracing::info!("Scheduling downgrade for user_id={}", user.user_id);

    let view = app_state
        .subscription_service
        .schedule_downgrade(user.user_id)
        .await?;

    Ok(Json(view))
}

/// Current subscription with plan and balance
#[utoipa::path(
    get,
    path = "/v1/subscriptions/current",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Current subscription", body = SubscriptionView),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "No current subscription", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn get_current_subscription(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SubscriptionView>, ApiError> {
    tracing::debug!("Getting current subscription for user_id={}", user.user_id);

    let view = app_state
        .subscription_service
        .get_current_subscription(user.user_id)
        .await?;

    Ok(Json(view))
}

/// List available plans (public endpoint - no auth required)
#[utoipa::path(
    get,
    path = "/v1/subscriptions/plans",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Available plans", body = ListPlansResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn list_plans(
    State(app_state): State<AppState>,
) -> Result<Json<ListPlansResponse>, ApiError> {
    let plans = app_state.subscription_service.list_plans().await?;
    Ok(Json(ListPlansResponse { plans }))
}

/// Create subscription router (requires session authentication)
pub fn create_subscriptions_router() -> Router<AppState> {
    Router::new()
        .route("/v1/subscriptions/checkout", post(create_checkout))
        .route("/v1/subscriptions/cancel", post(cancel_subscription))
        .route("/v1/subscriptions/restore", post(restore_subscription))
        .route("/v1/subscriptions/downgrade", post(schedule_downgrade))
        .route("/v1/subscriptions/current", get(get_current_subscription))
}

/// Server-sent events router; authenticates through the header or `?token=`
pub fn create_subscription_events_router() -> Router<AppState> {
    Router::new().route("/v1/subscriptions/events", get(sse::subscription_events))
}

/// Create public subscription router (plans - no auth)
pub fn create_public_subscriptions_router() -> Router<AppState> {
    Router::new().route("/v1/subscriptions/plans", get(list_plans))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_url_requires_https_outside_localhost() {
        assert!(validate_redirect_url("https://app.example.com/done", "successUrl").is_ok());
        assert!(validate_redirect_url("http://localhost:3000/done", "successUrl").is_ok());
        assert!(validate_redirect_url("http://127.0.0.1/done", "successUrl").is_ok());
        assert!(validate_redirect_url("http://app.example.com/done", "successUrl").is_err());
        assert!(validate_redirect_url("javascript:alert(1)", "successUrl").is_err());
        assert!(validate_redirect_url("not a url", "successUrl").is_err());
    }
}
