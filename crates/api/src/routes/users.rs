use axum::{
    extract::{Extension, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use services::credits::pricing::round_for_display;
use services::UserId;
use utoipa::ToSchema;

use crate::{error::ApiError, middleware::AuthenticatedUser, state::AppState};

/// Profile of the authenticated user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileResponse {
    pub id: UserId,
    pub email: String,
    /// Balance rounded up to two decimal places
    #[schema(value_type = String)]
    pub credits_remaining: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<services::user::User> for UserProfileResponse {
    fn from(user: services::user::User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            credits_remaining: round_for_display(user.credits_remaining),
            created_at: user.created_at,
        }
    }
}

/// Get current user
///
/// Returns the profile of the currently authenticated user. The first call for a new
/// identity creates the local user and puts it on the free plan.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    responses(
        (status = 200, description = "Current user profile", body = UserProfileResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn get_current_user(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UserProfileResponse>, ApiError> {
    tracing::info!("Getting user profile for user: {}", user.user_id);

    let profile = app_state.user_service.ensure_user(&user.identity()).await?;

    Ok(Json(profile.into()))
}

pub fn create_user_router() -> Router<AppState> {
    Router::new().route("/v1/users/me", get(get_current_user))
}
