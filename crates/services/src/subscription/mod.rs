pub mod lifecycle;
pub mod ports;
pub mod service;

pub use ports::{
    NewSubscription, PaymentStatus, Subscription, SubscriptionRepository, SubscriptionService,
    SubscriptionStatus, SubscriptionView, FREE_TIER_EXTERNAL_ID,
};
pub use service::{SubscriptionServiceConfig, SubscriptionServiceImpl};
