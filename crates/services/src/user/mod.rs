pub mod ports;
pub mod service;

pub use ports::{User, UserIdentity, UserRepository, UserService};
pub use service::UserServiceImpl;
