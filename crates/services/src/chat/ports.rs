use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::credits::pricing::TokenUsage;
use crate::error::ChatError;
use crate::types::{ChatId, ChatMessageId, UserId};

/// A chat session owned by a user
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub user_id: UserId,
    pub title: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(anyhow::anyhow!("Unknown chat role: {}", other)),
        }
    }
}

/// Append-only chat history row
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub role: ChatRole,
    pub content: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_used: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub role: ChatRole,
    pub content: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub credits_used: Decimal,
}

/// One completed prompt/reply round trip with the model's token usage
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub chat_id: ChatId,
    pub model: String,
    pub prompt: String,
    pub reply: String,
    pub usage: TokenUsage,
}

/// Result of recording an exchange
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedExchange {
    pub messages: Vec<ChatMessage>,
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_used: Decimal,
    #[cfg_attr(feature = "utoipa", schema(value_type = String))]
    pub credits_remaining: Decimal,
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create_chat(
        &self,
        user_id: UserId,
        title: String,
        model: String,
    ) -> anyhow::Result<Chat>;

    /// Non-deleted chats, newest first
    async fn list_chats(&self, user_id: UserId) -> anyhow::Result<Vec<Chat>>;

    /// A non-deleted chat owned by the user
    async fn get_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<Option<Chat>>;

    /// Returns false when the chat does not exist, is foreign or already deleted
    async fn soft_delete_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<bool>;

    /// Chat history, oldest first
    async fn list_messages(&self, chat_id: ChatId) -> anyhow::Result<Vec<ChatMessage>>;
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn create_chat(
        &self,
        user_id: UserId,
        title: Option<String>,
        model: String,
    ) -> Result<Chat, ChatError>;

    async fn list_chats(&self, user_id: UserId) -> Result<Vec<Chat>, ChatError>;

    async fn get_chat_history(
        &self,
        user_id: UserId,
        chat_id: ChatId,
    ) -> Result<(Chat, Vec<ChatMessage>), ChatError>;

    async fn delete_chat(&self, user_id: UserId, chat_id: ChatId) -> Result<(), ChatError>;

    /// Gate before calling the model: the user must hold a positive balance
    async fn authorize_message(&self, user_id: UserId) -> Result<Decimal, ChatError>;

    /// Meter an exchange and append both history rows atomically
    async fn record_exchange(
        &self,
        user_id: UserId,
        exchange: ChatExchange,
    ) -> Result<RecordedExchange, ChatError>;
}
