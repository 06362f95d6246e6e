pub mod ports;

pub use ports::{SessionRepository, UserSession};
