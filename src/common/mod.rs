pub mod commands;
pub mod types;

pub use commands::TransportCommand;
pub use types::{
    ChatMessage, ConnectionState, ConversationId, MAX_BODY_CHARS, OutboundMessage, UserId,
    WireChatMessage,
};
