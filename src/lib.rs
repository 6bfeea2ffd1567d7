pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod storage;

pub use chat::{ConversationState, ConversationViewModel, HistoryStatus};
pub use common::{ChatMessage, ConnectionState, ConversationId, UserId};
pub use config::ChatConfig;
pub use session::SessionTokenHolder;
