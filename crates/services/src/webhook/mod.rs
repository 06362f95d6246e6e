pub mod dedup;
pub mod events;
pub mod service;
pub mod signature;

pub use dedup::{EventDeduplicator, DEFAULT_DEDUP_WINDOW};
pub use events::{parse_event, ParsedEvent, WebhookEvent};
pub use service::{WebhookOutcome, WebhookService, WebhookServiceConfig, WebhookServiceImpl};
pub use signature::{sign_payload, WebhookVerifier, DEFAULT_TOLERANCE_SECS};
