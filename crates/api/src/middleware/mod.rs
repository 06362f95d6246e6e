pub mod auth;

pub use auth::{auth_middleware, query_auth_middleware, AuthState, AuthenticatedUser};
