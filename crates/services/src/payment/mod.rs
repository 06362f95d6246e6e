pub mod ports;
pub mod stripe_provider;

pub use ports::{CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider};
pub use stripe_provider::StripePaymentProvider;
