use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use services::chat::{Chat, ChatExchange, ChatMessage, RecordedExchange};
use services::credits::TokenUsage;
use services::ChatId;
use utoipa::ToSchema;

use crate::{error::ApiError, middleware::AuthenticatedUser, state::AppState};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// Defaults to "New Chat"
    #[serde(default)]
    pub title: Option<String>,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListChatsResponse {
    pub chats: Vec<Chat>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatHistoryResponse {
    pub chat: Chat,
    /// Oldest first
    pub messages: Vec<ChatMessage>,
}

/// A completed prompt/reply exchange reported by the chat frontend
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordExchangeRequest {
    pub model: String,
    pub prompt: String,
    pub reply: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeMessageResponse {
    #[schema(value_type = String)]
    pub credits_remaining: Decimal,
}

fn parse_chat_id(chat_id: &str) -> Result<ChatId, ApiError> {
    chat_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid chat id: {}", chat_id)))
}

#[utoipa::path(
    get,
    path = "/v1/chats",
    tag = "Chats",
    responses(
        (status = 200, description = "Chats, newest first", body = ListChatsResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn list_chats(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<ListChatsResponse>, ApiError> {
    let chats = app_state.chat_service.list_chats(user.user_id).await?;
    Ok(Json(ListChatsResponse { chats }))
}

#[utoipa::path(
    post,
    path = "/v1/chats",
    tag = "Chats",
    request_body = CreateChatRequest,
    responses(
        (status = 201, description = "Chat created", body = Chat),
        (status = 400, description = "Invalid request", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn create_chat(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    tracing::info!("Creating chat for user_id={}, model={}", user.user_id, req.model);

    let chat = app_state
        .chat_service
        .create_chat(user.user_id, req.title, req.model)
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

#[utoipa::path(
    get,
    path = "/v1/chats/{chat_id}",
    tag = "Chats",
    params(("chat_id" = String, Path, description = "Chat ID")),
    responses(
        (status = 200, description = "Chat with its history", body = ChatHistoryResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Chat not found", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn get_chat(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let (chat, messages) = app_state
        .chat_service
        .get_chat_history(user.user_id, chat_id)
        .await?;
    Ok(Json(ChatHistoryResponse { chat, messages }))
}

#[utoipa::path(
    delete,
    path = "/v1/chats/{chat_id}",
    tag = "Chats",
    params(("chat_id" = String, Path, description = "Chat ID")),
    responses(
        (status = 204, description = "Chat deleted"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Chat not found", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn delete_chat(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;
    tracing::info!("Deleting chat_id={} for user_id={}", chat_id, user.user_id);

    app_state
        .chat_service
        .delete_chat(user.user_id, chat_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Chat history, oldest first
#[utoipa::path(
    get,
    path = "/v1/chats/{chat_id}/messages",
    tag = "Chats",
    params(("chat_id" = String, Path, description = "Chat ID")),
    responses(
        (status = 200, description = "Chat messages", body = Vec<ChatMessage>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Chat not found", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn list_messages(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let (_, messages) = app_state
        .chat_service
        .get_chat_history(user.user_id, chat_id)
        .await?;
    Ok(Json(messages))
}

/// Check that the user may send a message before the model is called
#[utoipa::path(
    post,
    path = "/v1/chats/{chat_id}/authorize",
    tag = "Chats",
    params(("chat_id" = String, Path, description = "Chat ID")),
    responses(
        (status = 200, description = "User may send a message", body = AuthorizeMessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 402, description = "No credits left", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Chat not found", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn authorize_message(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(chat_id): Path<String>,
) -> Result<Json<AuthorizeMessageResponse>, ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;
    app_state
        .chat_service
        .get_chat_history(user.user_id, chat_id)
        .await?;

    let credits_remaining = app_state
        .chat_service
        .authorize_message(user.user_id)
        .await?;
    Ok(Json(AuthorizeMessageResponse { credits_remaining }))
}

/// Meter a completed exchange and append it to the chat history
#[utoipa::path(
    post,
    path = "/v1/chats/{chat_id}/messages",
    tag = "Chats",
    params(("chat_id" = String, Path, description = "Chat ID")),
    request_body = RecordExchangeRequest,
    responses(
        (status = 201, description = "Exchange recorded", body = RecordedExchange),
        (status = 400, description = "Invalid request", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 402, description = "Insufficient credits", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Chat not found", body = crate::error::ApiErrorResponse)
    ),
    security(("session_token" = []))
)]
pub async fn record_exchange(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(chat_id): Path<String>,
    Json(req): Json<RecordExchangeRequest>,
) -> Result<(StatusCode, Json<RecordedExchange>), ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;

    app_state
        .chat_service
        .authorize_message(user.user_id)
        .await?;

    let recorded = app_state
        .chat_service
        .record_exchange(
            user.user_id,
            ChatExchange {
                chat_id,
                model: req.model,
                prompt: req.prompt,
                reply: req.reply,
                usage: req.usage,
            },
        )
        .await?;

    tracing::info!(
        "Recorded exchange for user_id={}, chat_id={}, credits_used={}",
        user.user_id,
        chat_id,
        recorded.credits_used
    );
    Ok((StatusCode::CREATED, Json(recorded)))
}

pub fn create_chats_router() -> Router<AppState> {
    Router::new()
        .route("/v1/chats", get(list_chats).post(create_chat))
        .route("/v1/chats/{chat_id}", get(get_chat).delete(delete_chat))
        .route(
            "/v1/chats/{chat_id}/messages",
            get(list_messages).post(record_exchange),
        )
        .route(
            "/v1/chats/{chat_id}/authorize",
            axum::routing::post(authorize_message),
        )
}
