pub mod ports;
pub mod registry;

pub use ports::{NotifierEvent, SubscriptionNotifier};
pub use registry::{NotifierConnection, NotifierRegistry};
