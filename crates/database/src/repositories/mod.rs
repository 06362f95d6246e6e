pub mod chat_repository;
pub mod credits_repository;
pub mod plan_repository;
pub mod session_repository;
pub mod subscription_repository;
pub mod user_repository;

pub use chat_repository::PostgresChatRepository;
pub use credits_repository::PostgresCreditTransactionRepository;
pub use plan_repository::PostgresPlanRepository;
pub use session_repository::PostgresSessionRepository;
pub use subscription_repository::PostgresSubscriptionRepository;
pub use user_repository::PostgresUserRepository;
