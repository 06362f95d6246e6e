use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

use super::ports::{NotifierEvent, SubscriptionNotifier};
use crate::types::UserId;

/// Buffered events per connection before a slow consumer is evicted
pub const CHANNEL_BUFFER: usize = 32;

struct Registration {
    connection_id: u64,
    sender: mpsc::Sender<NotifierEvent>,
}

/// Process-local map of user id to the single live push channel for that user
#[derive(Default)]
pub struct NotifierRegistry {
    channels: RwLock<HashMap<UserId, Registration>>,
    next_connection_id: AtomicU64,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, Registration>> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, Registration>> {
        self.channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a channel for the user; replaces (without closing) any previous one
    pub fn register(&self, user_id: UserId, sender: mpsc::Sender<NotifierEvent>) -> u64 {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .write()
            .insert(
                user_id,
                Registration {
                    connection_id,
                    sender,
                },
            )
            .is_some();

        tracing::debug!(
            "Notifier channel registered: user_id={}, connection_id={}, replaced={}",
            user_id,
            connection_id,
            replaced
        );
        connection_id
    }

    pub fn unregister(&self, user_id: UserId) {
        if self.write().remove(&user_id).is_some() {
            tracing::debug!("Notifier channel unregistered: user_id={}", user_id);
        }
    }

    /// Remove the registration only if it still belongs to `connection_id`
    pub fn release(&self, user_id: UserId, connection_id: u64) {
        let mut channels = self.write();
        if channels
            .get(&user_id)
            .is_some_and(|registration| registration.connection_id == connection_id)
        {
            channels.remove(&user_id);
            tracing::debug!(
                "Notifier channel released: user_id={}, connection_id={}",
                user_id,
                connection_id
            );
        }
    }

    /// Open a channel for the user; the registration is released when the connection drops
    pub fn connect(self: &Arc<Self>, user_id: UserId) -> NotifierConnection {
        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER);
        let connection_id = self.register(user_id, sender);
        NotifierConnection {
            registry: Arc::clone(self),
            user_id,
            connection_id,
            receiver,
        }
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.read().contains_key(&user_id)
    }

    pub fn connected_count(&self) -> usize {
        self.read().len()
    }
}

impl SubscriptionNotifier for NotifierRegistry {
    fn publish(&self, user_id: UserId, event: NotifierEvent) {
        let result = match self.read().get(&user_id) {
            Some(registration) => Some((
                registration.connection_id,
                registration.sender.try_send(event),
            )),
            None => None,
        };

        match result {
            None => {
                tracing::debug!("No notifier channel for user_id={}, event dropped", user_id);
            }
            Some((_, Ok(()))) => {
                tracing::debug!("Notifier event sent: user_id={}", user_id);
            }
            Some((connection_id, Err(e))) => {
                tracing::warn!(
                    "Notifier write failed, evicting channel: user_id={}, error={}",
                    user_id,
                    e
                );
                self.release(user_id, connection_id);
            }
        }
    }
}

/// Receiving side of a registered channel
pub struct NotifierConnection {
    registry: Arc<NotifierRegistry>,
    user_id: UserId,
    connection_id: u64,
    receiver: mpsc::Receiver<NotifierEvent>,
}

impl NotifierConnection {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Next event, or None once the registration was replaced or evicted
    pub async fn recv(&mut self) -> Option<NotifierEvent> {
        self.receiver.recv().await
    }
}

impl Drop for NotifierConnection {
    fn drop(&mut self) {
        self.registry.release(self.user_id, self.connection_id);
    }
}
