use std::sync::Arc;

use futures::Stream;
use futures::future::{self, BoxFuture};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::{
    ChatMessage, ConnectionState, ConversationId, MAX_BODY_CHARS, OutboundMessage, UserId,
};
use crate::error::{ChatError, HistoryError};
use crate::network::{HistoryFetcher, TransportHandle};
use crate::session::SessionTokenHolder;

use super::merger::{ConversationState, MessageMerger, run_merge};

struct OpenConversation {
    id: ConversationId,
    state: watch::Receiver<ConversationState>,
    task: JoinHandle<()>,
}

impl Drop for OpenConversation {
    fn drop(&mut self) {
        // Discards any history fetch still in flight together with the task.
        self.task.abort();
    }
}

/// Binds one open conversation to the UI.
pub struct ConversationViewModel {
    transport: TransportHandle,
    history: Arc<dyn HistoryFetcher>,
    session: SessionTokenHolder,
    local_user_id: UserId,
    open: Option<OpenConversation>,
}

impl ConversationViewModel {
    pub fn new(
        transport: TransportHandle,
        history: Arc<dyn HistoryFetcher>,
        session: SessionTokenHolder,
        local_user_id: UserId,
    ) -> Self {
        Self {
            transport,
            history,
            session,
            local_user_id,
            open: None,
        }
    }

    pub fn local_user_id(&self) -> UserId {
        self.local_user_id
    }

    pub fn is_open(&self, conversation_id: ConversationId) -> bool {
        self.open
            .as_ref()
            .is_some_and(|open| open.id == conversation_id)
    }

    /// Fetches history and subscribes to live events. Must be called from
    /// within a tokio runtime. A no-op when `conversation_id` is already open;
    /// any other open conversation is closed first.
    pub fn open(&mut self, conversation_id: ConversationId) {
        if self.is_open(conversation_id) {
            return;
        }
        self.close();

        // Subscribe before the fetch starts so no push falls in between.
        let inbound = self.transport.subscribe_inbound();
        let history: BoxFuture<'static, Result<Vec<ChatMessage>, HistoryError>> =
            match self.session.token() {
                Some(token) => self.history.fetch(conversation_id, &token),
                None => Box::pin(future::ready(Err(HistoryError::Unauthenticated))),
            };

        let (publish, state) = watch::channel(ConversationState::loading(conversation_id));
        let task = tokio::spawn(run_merge(
            MessageMerger::new(conversation_id),
            history,
            inbound,
            self.session.clone(),
            publish,
        ));

        log::info!("Opened conversation {conversation_id}");
        self.open = Some(OpenConversation {
            id: conversation_id,
            state,
            task,
        });
    }

    /// Stops routing live events into this conversation. The shared
    /// connection stays up.
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            log::info!("Closed conversation {}", open.id);
        }
    }

    /// Publishes `body` to the open conversation. Nothing is inserted
    /// locally: the message shows up once the server echoes it back.
    pub fn send(&self, body: &str) -> Result<(), ChatError> {
        let open = self.open.as_ref().ok_or(ChatError::NotOpen)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::EmptyBody);
        }
        let length = body.chars().count();
        if length > MAX_BODY_CHARS {
            return Err(ChatError::BodyTooLong {
                max_length: MAX_BODY_CHARS,
                actual_length: length,
            });
        }

        self.transport.send(OutboundMessage {
            conversation_id: open.id,
            sender_id: self.local_user_id,
            body: body.to_string(),
        });
        Ok(())
    }

    pub fn observe(&self) -> Option<watch::Receiver<ConversationState>> {
        self.open.as_ref().map(|open| open.state.clone())
    }

    pub fn current(&self) -> Option<ConversationState> {
        self.open.as_ref().map(|open| open.state.borrow().clone())
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.connection_state()
    }

    pub fn observe_connection_state(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        self.transport.observe_connection_state()
    }
}

impl Drop for ConversationViewModel {
    fn drop(&mut self) {
        self.close();
    }
}
