use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use services::{BillingError, ChatError};
use utoipa::ToSchema;

/// Structured error response returned to API consumers
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Convenient wrapper type for API errors that combines status code with error response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ApiErrorResponse,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            response: ApiErrorResponse {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Add optional details to the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.response.details = Some(details.into());
        self
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 401 Unauthorized
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 402 Payment Required
    pub fn insufficient_credits(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_credits",
            message,
        )
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 500 Internal Server Error
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_server_error",
            message,
        )
    }

    /// Invalid or malformed session token
    pub fn invalid_token() -> Self {
        Self::unauthorized("Invalid or malformed session token")
            .with_details("Session token must start with 'sess_' and be 37 characters long")
    }

    /// Session token not found
    pub fn session_not_found() -> Self {
        Self::unauthorized("Session not found").with_details(
            "The provided session token does not match any active session. Please log in again.",
        )
    }

    /// Session expired
    pub fn session_expired() -> Self {
        Self::unauthorized("Session has expired")
            .with_details("Your session has expired. Please log in again to continue.")
    }

    /// Missing authorization header
    pub fn missing_auth_header() -> Self {
        Self::unauthorized("Missing authorization header")
            .with_details("Request must include an Authorization header with a Bearer token")
    }

    /// Invalid authorization header format
    pub fn invalid_auth_header() -> Self {
        Self::unauthorized("Invalid authorization header format")
            .with_details("Authorization header must be in the format: 'Bearer <token>'")
    }
}

/// Implement IntoResponse so ApiError can be returned directly from handlers
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

/// Convert from anyhow::Error for convenience in services
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", err);
        Self::internal_server_error("An internal error occurred")
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Unauthorized => Self::unauthorized("Unauthorized"),
            BillingError::NotFound(message) => Self::not_found(message),
            BillingError::ValidationFailed(message) => Self::bad_request(message),
            BillingError::InsufficientCredits {
                required,
                available,
            } => Self::insufficient_credits("Insufficient credits").with_details(format!(
                "required={}, available={}",
                required, available
            )),
            BillingError::WebhookSignatureInvalid(reason) => {
                tracing::warn!("Rejected webhook delivery: {}", reason);
                Self::new(
                    StatusCode::BAD_REQUEST,
                    "invalid_signature",
                    "Invalid webhook signature",
                )
            }
            BillingError::ExternalProvider(message) => {
                tracing::error!("Payment provider error: {}", message);
                Self::internal_server_error("An internal error occurred")
            }
            BillingError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                Self::internal_server_error("An internal error occurred")
            }
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::ChatNotFound => Self::not_found("Chat not found"),
            ChatError::ValidationFailed(message) => Self::bad_request(message),
            ChatError::Billing(err) => err.into(),
            ChatError::Internal(message) => {
                tracing::error!("Internal chat error: {}", message);
                Self::internal_server_error("An internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_with_details() {
        let err = ApiError::unauthorized("Access denied").with_details("Token expired");
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.response.details, Some("Token expired".to_string()));
    }

    #[test]
    fn test_billing_error_status_mapping() {
        let cases = [
            (BillingError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                BillingError::NotFound("missing".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                BillingError::ValidationFailed("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::InsufficientCredits {
                    required: dec!(2),
                    available: dec!(1),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BillingError::WebhookSignatureInvalid("stale".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::ExternalProvider("stripe down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::Internal("db".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = ApiError::from(BillingError::Internal("connection refused".into()));
        assert_eq!(err.response.message, "An internal error occurred");
        assert!(err.response.details.is_none());
    }

    #[test]
    fn test_chat_error_mapping() {
        assert_eq!(
            ApiError::from(ChatError::ChatNotFound).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ChatError::Billing(BillingError::InsufficientCredits {
                required: dec!(1),
                available: dec!(0),
            }))
            .status,
            StatusCode::PAYMENT_REQUIRED
        );
    }
}
