use thiserror::Error;

/// Failures of the realtime socket link. None of these are fatal: the
/// transport turns them into connection-state changes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid socket endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Socket closed")]
    Closed,
}

/// Malformed Socket.IO / Engine.IO frames.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown packet type '{0}'")]
    UnknownPacket(char),

    #[error("Invalid packet payload: {0}")]
    InvalidPayload(String),

    #[error("Missing field '{field}' in chat message")]
    MissingField { field: &'static str },
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::InvalidPayload(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("No session token")]
    Unauthenticated,

    #[error("Session token rejected by server")]
    Unauthorized,

    #[error("Server error: {message}")]
    Server { message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl HistoryError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, HistoryError::Unauthorized)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token store lock poisoned")]
    Poisoned,
}

/// Errors surfaced to the UI by the conversation view model.
#[derive(Debug, Error, PartialEq)]
pub enum ChatError {
    #[error("No conversation is open")]
    NotOpen,

    #[error("Message cannot be empty")]
    EmptyBody,

    #[error("Message exceeds max length of {max_length} (actual: {actual_length})")]
    BodyTooLong {
        max_length: usize,
        actual_length: usize,
    },
}
