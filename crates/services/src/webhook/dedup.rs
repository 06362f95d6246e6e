use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default window during which a repeated delivery is skipped
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Process-local TTL set of recently claimed webhook keys
pub struct EventDeduplicator {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl EventDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(event_type: &str, event_id: &str) -> String {
        format!("{}:{}", event_type, event_id)
    }

    /// Claim a key; returns false if it was claimed within the window
    pub fn try_claim(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        seen.retain(|_, claimed_at| now.duration_since(*claimed_at) < self.window);
        if seen.contains_key(key) {
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// Forget a key so the next delivery is processed again
    pub fn release(&self, key: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_window_is_rejected() {
        let dedup = EventDeduplicator::default();
        let key = EventDeduplicator::key("checkout.session.completed", "evt_1");

        assert!(dedup.try_claim(&key));
        assert!(!dedup.try_claim(&key));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!dedup.try_claim(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_expires_after_window() {
        let dedup = EventDeduplicator::new(Duration::from_secs(5));
        assert!(dedup.try_claim("a:1"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(dedup.try_claim("a:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_allows_retry() {
        let dedup = EventDeduplicator::default();
        assert!(dedup.try_claim("a:1"));
        dedup.release("a:1");
        assert!(dedup.try_claim("a:1"));
    }

    #[tokio::test]
    async fn test_key_includes_type_and_id() {
        assert_eq!(EventDeduplicator::key("t", "i"), "t:i");
        let dedup = EventDeduplicator::default();
        assert!(dedup.try_claim("invoice.paid:evt_1"));
        assert!(dedup.try_claim("invoice.created:evt_1"));
    }
}
