use crate::{error::ApiError, middleware::AuthenticatedUser, state::AppState};
use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use services::credits::CreditsSummary;

const DEFAULT_TRANSACTION_LIMIT: i64 = 20;
const MAX_TRANSACTION_LIMIT: i64 = 100;

/// Query parameters for the credits summary
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CreditsQuery {
    /// Number of recent ledger rows to include (1-100, default 20)
    pub limit: Option<i64>,
}

/// GET /v1/credits - Get user's credits summary
#[utoipa::path(
    get,
    path = "/v1/credits",
    tag = "Credits",
    params(CreditsQuery),
    responses(
        (status = 200, description = "Credits summary", body = CreditsSummary),
        (status = 400, description = "Invalid limit", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn get_credits(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<CreditsQuery>,
) -> Result<Json<CreditsSummary>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT);
    if !(1..=MAX_TRANSACTION_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_TRANSACTION_LIMIT
        )));
    }

    let summary = app_state
        .credits_service
        .get_summary(user.user_id, limit)
        .await?;
    Ok(Json(summary))
}

pub fn create_credits_router() -> Router<AppState> {
    Router::new().route("/v1/credits", get(get_credits))
}
