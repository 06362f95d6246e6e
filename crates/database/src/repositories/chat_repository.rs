use crate::pool::DbPool;
use async_trait::async_trait;
use services::chat::ports::{Chat, ChatMessage, ChatRepository};
use services::{ChatId, UserId};
use tokio_postgres::Row;

pub(crate) const CHAT_COLUMNS: &str = "id, user_id, title, model, is_deleted, created_at, updated_at";

pub(crate) const CHAT_MESSAGE_COLUMNS: &str = "id, chat_id, user_id, role, content, model, \
     prompt_tokens, completion_tokens, credits_used, created_at";

pub(crate) fn chat_from_row(row: &Row) -> Chat {
    Chat {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        model: row.get("model"),
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub(crate) fn chat_message_from_row(row: &Row) -> anyhow::Result<ChatMessage> {
    let role: String = row.get("role");
    Ok(ChatMessage {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        user_id: row.get("user_id"),
        role: role.parse()?,
        content: row.get("content"),
        model: row.get("model"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        credits_used: row.get("credits_used"),
        created_at: row.get("created_at"),
    })
}

pub struct PostgresChatRepository {
    pool: DbPool,
}

impl PostgresChatRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRepository for PostgresChatRepository {
    async fn create_chat(
        &self,
        user_id: UserId,
        title: String,
        model: String,
    ) -> anyhow::Result<Chat> {
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO chats (user_id, title, model) VALUES ($1, $2, $3) RETURNING {}",
                    CHAT_COLUMNS
                ),
                &[&user_id, &title, &model],
            )
            .await?;

        Ok(chat_from_row(&row))
    }

    async fn list_chats(&self, user_id: UserId) -> anyhow::Result<Vec<Chat>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM chats
                     WHERE user_id = $1 AND NOT is_deleted
                     ORDER BY created_at DESC",
                    CHAT_COLUMNS
                ),
                &[&user_id],
            )
            .await?;

        Ok(rows.iter().map(chat_from_row).collect())
    }

    async fn get_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<Option<Chat>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM chats WHERE id = $1 AND user_id = $2 AND NOT is_deleted",
                    CHAT_COLUMNS
                ),
                &[&chat_id, &user_id],
            )
            .await?;

        Ok(row.as_ref().map(chat_from_row))
    }

    async fn soft_delete_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<bool> {
        let client = self.pool.get().await?;

        let updated = client
            .execute(
                "UPDATE chats SET is_deleted = TRUE, updated_at = NOW()
                 WHERE id = $1 AND user_id = $2 AND NOT is_deleted",
                &[&chat_id, &user_id],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn list_messages(&self, chat_id: ChatId) -> anyhow::Result<Vec<ChatMessage>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM chat_history WHERE chat_id = $1 ORDER BY created_at ASC, id",
                    CHAT_MESSAGE_COLUMNS
                ),
                &[&chat_id],
            )
            .await?;

        rows.iter().map(chat_message_from_row).collect()
    }
}
