use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use services::auth::SessionRepository;
use services::user::{UserIdentity, UserService};
use services::{SessionId, UserId};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::ApiError;

const SESSION_TOKEN_PREFIX: &str = "sess_";
const SESSION_TOKEN_LENGTH: usize = 37;

/// Authenticated user information inserted into request extensions by the auth middleware.
/// Extract in route handlers using `Extension<AuthenticatedUser>`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub email: String,
}

impl AuthenticatedUser {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

/// State for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub session_repository: Arc<dyn SessionRepository>,
    pub user_service: Arc<dyn UserService>,
}

/// Hash a session token for lookup
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn validate_token_format(token: &str) -> Result<(), ApiError> {
    if !token.starts_with(SESSION_TOKEN_PREFIX) {
        tracing::warn!("Invalid session token format: token does not start with 'sess_'");
        return Err(ApiError::invalid_token());
    }

    if token.len() != SESSION_TOKEN_LENGTH {
        tracing::warn!(
            "Invalid session token format: expected length {}, got {}",
            SESSION_TOKEN_LENGTH,
            token.len()
        );
        return Err(ApiError::invalid_token());
    }

    Ok(())
}

/// Extract and validate token from Authorization header
fn extract_token_from_request(request: &Request) -> Result<String, ApiError> {
    let auth_value = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("No authorization header found");
            ApiError::missing_auth_header()
        })?;

    let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Authorization header does not start with 'Bearer '");
        ApiError::invalid_auth_header()
    })?;

    validate_token_format(token)?;
    Ok(token.to_string())
}

/// Extract the token from the `token` query parameter.
/// Browsers cannot set headers on an EventSource, so the SSE route accepts it there too.
fn extract_token_from_query(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

/// Authenticate a session by token hash
async fn authenticate_session_by_token(
    state: &AuthState,
    token_hash: String,
) -> Result<AuthenticatedUser, ApiError> {
    let hash_prefix = token_hash.chars().take(16).collect::<String>();
    tracing::debug!("Authenticating session by token hash: {}...", hash_prefix);

    let session = state
        .session_repository
        .get_session_by_token_hash(token_hash)
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to get session from repository for token_hash {}...: {}",
                hash_prefix,
                e
            );
            ApiError::internal_server_error("Failed to authenticate session")
        })?
        .ok_or_else(|| {
            tracing::warn!("Session not found for token_hash: {}...", hash_prefix);
            ApiError::session_not_found()
        })?;

    let now = Utc::now();
    if session.is_expired(now) {
        tracing::warn!(
            "Session expired: session_id={}, expired {} seconds ago",
            session.session_id,
            now.signed_duration_since(session.expires_at).num_seconds()
        );
        return Err(ApiError::session_expired());
    }

    Ok(AuthenticatedUser {
        user_id: session.user_id,
        session_id: session.session_id,
        email: session.email,
    })
}

/// Resolve a raw token into an authenticated user, creating the local user on first sight
async fn authenticate_token(token: &str, state: &AuthState) -> Result<AuthenticatedUser, ApiError> {
    let user = authenticate_session_by_token(state, hash_session_token(token)).await?;

    state.user_service.ensure_user(&user.identity()).await?;

    tracing::debug!(
        "Successfully authenticated session: user_id={}, session_id={}",
        user.user_id,
        user.session_id
    );
    Ok(user)
}

/// Authentication middleware that validates session tokens
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    tracing::debug!("Auth middleware invoked for {} {}", method, path);

    let token = extract_token_from_request(&request).map_err(|e| e.into_response())?;
    let user = authenticate_token(&token, &state)
        .await
        .map_err(|e| e.into_response())?;

    tracing::info!(
        "Authentication successful for user_id={}, session_id={} on {} {}",
        user.user_id,
        user.session_id,
        method,
        path
    );
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Like `auth_middleware`, but falls back to a `?token=` query parameter
pub async fn query_auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = match extract_token_from_request(&request) {
        Ok(token) => token,
        Err(header_error) => {
            let token = extract_token_from_query(&request)
                .ok_or_else(|| header_error.into_response())?;
            validate_token_format(&token).map_err(|e| e.into_response())?;
            token
        }
    };

    let user = authenticate_token(&token, &state)
        .await
        .map_err(|e| e.into_response())?;

    tracing::info!(
        "Authentication successful for user_id={} on {}",
        user.user_id,
        request.uri().path()
    );
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
