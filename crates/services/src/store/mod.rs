pub mod ports;

pub use ports::{NewPaymentWebhook, Store, StoreTransaction};
