use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde_json::Value;

use crate::common::{ChatMessage, ConversationId, WireChatMessage};
use crate::error::{CodecError, HistoryError};

const CHAT_HISTORY_PATH: &str = "/accidents/chat/";

/// One-shot fetch of a conversation's persisted messages, ordered by the server.
pub trait HistoryFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        conversation_id: ConversationId,
        token: &str,
    ) -> BoxFuture<'static, Result<Vec<ChatMessage>, HistoryError>>;
}

/// Response envelope shared by the backend's REST endpoints.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    /// Kept raw so one bad record cannot fail the whole page.
    data: Option<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct RestHistoryClient {
    http: Client,
    api_url: String,
}

impl RestHistoryClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), api_url)
    }

    pub fn with_client(http: Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { http, api_url }
    }

    fn history_url(&self, conversation_id: ConversationId) -> String {
        format!("{}{CHAT_HISTORY_PATH}{conversation_id}", self.api_url)
    }
}

impl HistoryFetcher for RestHistoryClient {
    fn fetch(
        &self,
        conversation_id: ConversationId,
        token: &str,
    ) -> BoxFuture<'static, Result<Vec<ChatMessage>, HistoryError>> {
        let request = self
            .http
            .get(self.history_url(conversation_id))
            .header(header::AUTHORIZATION, token);

        Box::pin(async move {
            let response = request.send().await?;
            let status = response.status();
            log::debug!("GET history for conversation {conversation_id}: {status}");

            if status == StatusCode::UNAUTHORIZED {
                return Err(HistoryError::Unauthorized);
            }
            if !status.is_success() {
                // Error bodies usually still carry the envelope.
                let envelope = response.json::<Envelope>().await.unwrap_or_default();
                return Err(HistoryError::Server {
                    message: envelope
                        .message
                        .unwrap_or_else(|| format!("HTTP {status}")),
                });
            }

            let envelope = response.json::<Envelope>().await?;
            parse_envelope(conversation_id, envelope)
        })
    }
}

fn parse_envelope(
    conversation_id: ConversationId,
    envelope: Envelope,
) -> Result<Vec<ChatMessage>, HistoryError> {
    if envelope.status == Some(StatusCode::UNAUTHORIZED.as_u16()) {
        return Err(HistoryError::Unauthorized);
    }
    if envelope.error {
        return Err(HistoryError::Server {
            message: envelope
                .message
                .unwrap_or_else(|| "history request failed".to_string()),
        });
    }

    let messages = envelope
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(|record| match parse_record(record) {
            Ok(message) if message.conversation_id == conversation_id => Some(message),
            Ok(message) => {
                log::warn!(
                    "History for conversation {conversation_id} contained a message of conversation {}",
                    message.conversation_id
                );
                None
            }
            Err(err) => {
                log::warn!("Dropping malformed history record: {err}");
                None
            }
        })
        .collect();
    Ok(messages)
}

fn parse_record(record: Value) -> Result<ChatMessage, CodecError> {
    let wire: WireChatMessage = serde_json::from_value(record)?;
    ChatMessage::try_from(wire)
}
