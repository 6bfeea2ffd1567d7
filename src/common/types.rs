use serde::{Deserialize, Serialize};

use crate::error::CodecError;

pub type ConversationId = i64;
pub type UserId = i64;

/// Longest body the chat input accepts, in characters.
pub const MAX_BODY_CHARS: usize = 500;

/// A single chat utterance. `timestamp` is assigned by the server and is the
/// only ordering key; `id` is only present on history-fetched records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Option<i64>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    pub timestamp: i64,
}

impl ChatMessage {
    /// Live pushes carry no stable id, so identity is sender + body + timestamp.
    pub fn is_duplicate_of(&self, other: &ChatMessage) -> bool {
        self.sender_id == other.sender_id
            && self.timestamp == other.timestamp
            && self.body == other.body
    }

    pub fn is_from(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }
}

/// Chat record as the backend serialises it, both in history responses and
/// in socket pushes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChatMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl TryFrom<WireChatMessage> for ChatMessage {
    type Error = CodecError;

    fn try_from(wire: WireChatMessage) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: wire.id,
            conversation_id: wire
                .chat_id
                .ok_or(CodecError::MissingField { field: "chatId" })?,
            sender_id: wire
                .user_id
                .ok_or(CodecError::MissingField { field: "userId" })?,
            sender_name: wire.name.ok_or(CodecError::MissingField { field: "name" })?,
            body: wire
                .message
                .ok_or(CodecError::MissingField { field: "message" })?,
            timestamp: wire
                .timestamp
                .ok_or(CodecError::MissingField { field: "timestamp" })?,
        })
    }
}

/// Client → server chat event. Delivery is confirmed only by the echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "chatId")]
    pub conversation_id: ConversationId,
    #[serde(rename = "userId")]
    pub sender_id: UserId,
    #[serde(rename = "message")]
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session token; no connection is attempted.
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Link lost while a token is still present.
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}
