use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{SessionId, UserId};
use crate::user::ports::UserIdentity;

/// Session issued by the identity provider and shared with this service
#[derive(Debug, Clone)]
pub struct UserSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

/// Read-only access to identity-provider sessions
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Retrieve a session by the SHA-256 hash of its token
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<UserSession>>;
}
