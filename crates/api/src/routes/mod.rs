pub mod chats;
pub mod credits;
pub mod subscriptions;
pub mod users;
pub mod webhooks;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use http::HeaderValue;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::{middleware::AuthState, openapi::ApiDoc, state::AppState};

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// API version
    pub version: &'static str,
}

/// Health check endpoint
///
/// Returns the health status of the API service. This endpoint is typically used by
/// load balancers, monitoring systems, and orchestration tools to verify service availability.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create the API router without CORS
pub fn create_router(app_state: AppState) -> Router {
    let auth_state = AuthState {
        session_repository: app_state.session_repository.clone(),
        user_service: app_state.user_service.clone(),
    };

    // Session-authenticated routes
    let authed_routes = Router::new()
        .merge(subscriptions::create_subscriptions_router())
        .merge(credits::create_credits_router())
        .merge(chats::create_chats_router())
        .merge(users::create_user_router())
        .layer(from_fn_with_state(
            auth_state.clone(),
            crate::middleware::auth_middleware,
        ));

    // SSE accepts the token as a query parameter as well
    let event_routes = subscriptions::create_subscription_events_router().layer(
        from_fn_with_state(auth_state, crate::middleware::query_auth_middleware),
    );

    // Public routes (no auth required)
    let public_routes = Router::new()
        .merge(subscriptions::create_public_subscriptions_router())
        .merge(webhooks::create_webhooks_router());

    Router::new()
        .route("/health", get(health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(authed_routes)
        .merge(event_routes)
        .merge(public_routes)
        .with_state(app_state)
}

/// Create the main API router with CORS configuration and request tracing
pub fn create_router_with_cors(app_state: AppState, cors_config: config::CorsConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts: &http::request::Parts| {
                origin
                    .to_str()
                    .map(|origin| cors_config.is_allowed(origin))
                    .unwrap_or(false)
            },
        ))
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    create_router(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    fn test_cors_config() -> config::CorsConfig {
        config::CorsConfig {
            exact_matches: vec![
                "https://example.com".to_string(),
                "http://test.com".to_string(),
            ],
            wildcard_suffixes: vec![".chat.test".to_string(), "-example.com".to_string()],
        }
    }

    #[test]
    fn test_exact_match_allowed() {
        let config = test_cors_config();
        assert!(config.is_allowed("https://example.com"));
        assert!(config.is_allowed("http://test.com"));
        assert!(!config.is_allowed("https://evil.com"));
        assert!(!config.is_allowed("http://example.com"));
    }

    #[test]
    fn test_localhost_allowed() {
        let config = test_cors_config();
        assert!(config.is_allowed("http://localhost:3000"));
        assert!(config.is_allowed("http://localhost"));
        assert!(config.is_allowed("http://127.0.0.1:8080"));
    }

    #[test]
    fn test_localhost_subdomain_denied() {
        let config = test_cors_config();
        assert!(!config.is_allowed("http://localhost.evil.com"));
        assert!(!config.is_allowed("http://localhost.evil.com:3000"));
        assert!(!config.is_allowed("http://127.0.0.1.evil.com"));
    }

    #[test]
    fn test_https_wildcard() {
        let config = test_cors_config();
        assert!(config.is_allowed("https://app.chat.test"));
        assert!(config.is_allowed("https://preview-example.com"));
        assert!(!config.is_allowed("http://app.chat.test"));
        assert!(!config.is_allowed("https://fakechat.test"));
        assert!(!config.is_allowed("https://chat.test.evil.com"));
    }
}
