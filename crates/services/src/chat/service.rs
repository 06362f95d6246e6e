use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::ports::{
    Chat, ChatExchange, ChatMessage, ChatRepository, ChatRole, ChatService, NewChatMessage,
    RecordedExchange,
};
use crate::credits::ledger::{self, LedgerContext};
use crate::credits::pricing::ModelRates;
use crate::credits::PaymentMethod;
use crate::error::{BillingError, ChatError};
use crate::store::Store;
use crate::types::{ChatId, UserId};
use crate::user::ports::UserRepository;

const DEFAULT_CHAT_TITLE: &str = "New chat";
const MAX_TITLE_LEN: usize = 200;

pub struct ChatServiceImpl {
    store: Arc<dyn Store>,
    chat_repository: Arc<dyn ChatRepository>,
    user_repository: Arc<dyn UserRepository>,
    rates: ModelRates,
}

impl ChatServiceImpl {
    pub fn new(
        store: Arc<dyn Store>,
        chat_repository: Arc<dyn ChatRepository>,
        user_repository: Arc<dyn UserRepository>,
        rates: ModelRates,
    ) -> Self {
        Self {
            store,
            chat_repository,
            user_repository,
            rates,
        }
    }
}

#[async_trait]
impl ChatService for ChatServiceImpl {
    async fn create_chat(
        &self,
        user_id: UserId,
        title: Option<String>,
        model: String,
    ) -> Result<Chat, ChatError> {
        if model.trim().is_empty() {
            return Err(ChatError::ValidationFailed("model is required".to_string()));
        }
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ChatError::ValidationFailed(format!(
                "title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }

        let chat = self
            .chat_repository
            .create_chat(user_id, title, model)
            .await?;
        tracing::info!("Chat created: chat_id={}, user_id={}", chat.id, user_id);
        Ok(chat)
    }

    async fn list_chats(&self, user_id: UserId) -> Result<Vec<Chat>, ChatError> {
        tracing::debug!("Listing chats for user_id={}", user_id);
        Ok(self.chat_repository.list_chats(user_id).await?)
    }

    async fn get_chat_history(
        &self,
        user_id: UserId,
        chat_id: ChatId,
    ) -> Result<(Chat, Vec<ChatMessage>), ChatError> {
        let chat = self
            .chat_repository
            .get_chat(chat_id, user_id)
            .await?
            .ok_or(ChatError::ChatNotFound)?;
        let messages = self.chat_repository.list_messages(chat_id).await?;
        Ok((chat, messages))
    }

    async fn delete_chat(&self, user_id: UserId, chat_id: ChatId) -> Result<(), ChatError> {
        if !self
            .chat_repository
            .soft_delete_chat(chat_id, user_id)
            .await?
        {
            return Err(ChatError::ChatNotFound);
        }
        tracing::info!("Chat deleted: chat_id={}, user_id={}", chat_id, user_id);
        Ok(())
    }

    async fn authorize_message(&self, user_id: UserId) -> Result<Decimal, ChatError> {
        let user = self
            .user_repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;

        if user.credits_remaining <= Decimal::ZERO {
            tracing::info!("Message blocked, no credits left: user_id={}", user_id);
            return Err(BillingError::InsufficientCredits {
                required: Decimal::ZERO,
                available: user.credits_remaining,
            }
            .into());
        }
        Ok(user.credits_remaining)
    }

    async fn record_exchange(
        &self,
        user_id: UserId,
        exchange: ChatExchange,
    ) -> Result<RecordedExchange, ChatError> {
        let credits_used = self.rates.credits_for(&exchange.model, exchange.usage);

        let mut txn = self.store.begin().await?;
        let mut user = txn
            .lock_user(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("User not found".to_string()))?;
        let chat = txn
            .get_chat(exchange.chat_id, user_id)
            .await?
            .ok_or(ChatError::ChatNotFound)?;

        if !credits_used.is_zero() {
            ledger::deduct(
                txn.as_mut(),
                &mut user,
                credits_used,
                LedgerContext::new(
                    PaymentMethod::Usage,
                    format!("Chat message ({})", exchange.model),
                ),
            )
            .await?;
        }

        let prompt = txn
            .insert_chat_message(NewChatMessage {
                chat_id: chat.id,
                user_id,
                role: ChatRole::User,
                content: exchange.prompt,
                model: exchange.model.clone(),
                prompt_tokens: i64::from(exchange.usage.prompt_tokens),
                completion_tokens: 0,
                credits_used: Decimal::ZERO,
            })
            .await?;
        let reply = txn
            .insert_chat_message(NewChatMessage {
                chat_id: chat.id,
                user_id,
                role: ChatRole::Assistant,
                content: exchange.reply,
                model: exchange.model,
                prompt_tokens: 0,
                completion_tokens: i64::from(exchange.usage.completion_tokens),
                credits_used,
            })
            .await?;
        txn.commit().await?;

        tracing::info!(
            "Chat exchange recorded: chat_id={}, user_id={}, credits_used={}, balance={}",
            chat.id,
            user_id,
            credits_used,
            user.credits_remaining
        );

        Ok(RecordedExchange {
            messages: vec![prompt, reply],
            credits_used,
            credits_remaining: user.credits_remaining,
        })
    }
}
