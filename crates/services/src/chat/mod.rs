pub mod ports;
pub mod service;

pub use ports::{
    Chat, ChatExchange, ChatMessage, ChatRepository, ChatRole, ChatService, NewChatMessage,
    RecordedExchange,
};
pub use service::ChatServiceImpl;
