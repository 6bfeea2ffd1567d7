use std::future::Future;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::common::{ChatMessage, ConversationId};
use crate::error::HistoryError;
use crate::session::SessionTokenHolder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStatus {
    Loading,
    Loaded,
    /// Not retried; live messages keep flowing regardless.
    Failed(String),
}

/// What the UI renders for one open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    /// Always sorted by server timestamp, ascending.
    pub messages: Vec<ChatMessage>,
    pub history: HistoryStatus,
}

impl ConversationState {
    pub fn loading(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            history: HistoryStatus::Loading,
        }
    }

    /// True when the "no messages" placeholder should be shown.
    pub fn is_empty(&self) -> bool {
        self.history != HistoryStatus::Loading && self.messages.is_empty()
    }
}

/// Merges a conversation's history with its live events.
///
/// Live events that arrive while the history fetch is pending are held back
/// and replayed on top of the history once it resolves. Every insert keeps
/// the working set free of duplicates (same sender, body and timestamp) and
/// sorted by timestamp.
#[derive(Debug, Clone)]
pub struct MessageMerger {
    conversation_id: ConversationId,
    messages: Vec<ChatMessage>,
    pending: Option<Vec<ChatMessage>>,
    history: HistoryStatus,
}

impl MessageMerger {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            pending: Some(Vec::new()),
            history: HistoryStatus::Loading,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn is_seeded(&self) -> bool {
        self.pending.is_none()
    }

    /// Routes a live event. Returns true when the visible list changed.
    pub fn accept(&mut self, message: ChatMessage) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        match self.pending.as_mut() {
            Some(buffer) => {
                buffer.push(message);
                false
            }
            None => self.insert(message),
        }
    }

    /// Applies the history result and replays everything buffered meanwhile.
    /// Later calls are ignored.
    pub fn seed(&mut self, history: Result<Vec<ChatMessage>, HistoryError>) {
        let Some(buffered) = self.pending.take() else {
            log::warn!(
                "History for conversation {} already applied",
                self.conversation_id
            );
            return;
        };

        match history {
            Ok(messages) => {
                self.history = HistoryStatus::Loaded;
                for message in messages {
                    self.insert(message);
                }
            }
            Err(err) => {
                log::warn!(
                    "History fetch for conversation {} failed: {err}",
                    self.conversation_id
                );
                self.history = HistoryStatus::Failed(err.to_string());
            }
        }

        for message in buffered {
            self.insert(message);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn snapshot(&self) -> ConversationState {
        ConversationState {
            conversation_id: self.conversation_id,
            messages: self.messages.clone(),
            history: self.history.clone(),
        }
    }

    fn insert(&mut self, message: ChatMessage) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        if self
            .messages
            .iter()
            .any(|existing| existing.is_duplicate_of(&message))
        {
            log::debug!(
                "Discarding duplicate message at {} in conversation {}",
                message.timestamp,
                self.conversation_id
            );
            return false;
        }
        // After any equal timestamps, so ties keep arrival order.
        let at = self
            .messages
            .partition_point(|existing| existing.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        true
    }
}

/// Drives a [`MessageMerger`] until the inbound channel closes or the task
/// is aborted. `inbound` must be subscribed before `history` is polled so
/// nothing pushed during the fetch is missed.
pub async fn run_merge<F>(
    mut merger: MessageMerger,
    history: F,
    mut inbound: broadcast::Receiver<ChatMessage>,
    session: SessionTokenHolder,
    publish: watch::Sender<ConversationState>,
) where
    F: Future<Output = Result<Vec<ChatMessage>, HistoryError>>,
{
    let conversation_id = merger.conversation_id();
    tokio::pin!(history);
    let mut live = true;

    let result = loop {
        tokio::select! {
            result = &mut history => break result,
            received = inbound.recv(), if live => match received {
                Ok(message) => {
                    merger.accept(message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Conversation {conversation_id} lagged, skipped {skipped} live messages");
                }
                Err(RecvError::Closed) => live = false,
            },
        }
    };

    if matches!(&result, Err(err) if err.is_unauthorized()) {
        session.clear();
    }
    merger.seed(result);
    publish.send_replace(merger.snapshot());

    while live {
        match inbound.recv().await {
            Ok(message) => {
                if merger.accept(message) {
                    publish.send_replace(merger.snapshot());
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Conversation {conversation_id} lagged, skipped {skipped} live messages");
            }
            Err(RecvError::Closed) => live = false,
        }
    }
    log::debug!("Merge loop for conversation {conversation_id} ended");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    fn message(conversation_id: ConversationId, sender_id: i64, body: &str, timestamp: i64) -> ChatMessage {
        ChatMessage {
            id: None,
            conversation_id,
            sender_id,
            sender_name: format!("user-{sender_id}"),
            body: body.to_string(),
            timestamp,
        }
    }

    fn timestamps(messages: &[ChatMessage]) -> Vec<i64> {
        messages.iter().map(|message| message.timestamp).collect()
    }

    #[test]
    fn live_event_before_empty_history_is_kept() {
        let mut merger = MessageMerger::new(1);

        assert!(!merger.accept(message(1, 7, "hi", 1000)));
        assert!(merger.messages().is_empty());

        merger.seed(Ok(Vec::new()));

        let state = merger.snapshot();
        assert_eq!(state.history, HistoryStatus::Loaded);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].sender_id, 7);
        assert_eq!(state.messages[0].body, "hi");
        assert_eq!(state.messages[0].timestamp, 1000);
    }

    #[test]
    fn live_duplicate_of_history_is_discarded() {
        let mut merger = MessageMerger::new(1);
        let mut stored = message(1, 1, "a", 100);
        stored.id = Some(5);
        merger.seed(Ok(vec![stored]));

        assert!(!merger.accept(message(1, 1, "a", 100)));

        assert_eq!(merger.messages().len(), 1);
        assert_eq!(merger.messages()[0].id, Some(5));
    }

    #[test]
    fn buffered_duplicates_collapse_on_seed() {
        let mut merger = MessageMerger::new(1);
        merger.accept(message(1, 1, "a", 100));
        merger.accept(message(1, 1, "a", 100));

        merger.seed(Ok(vec![message(1, 1, "a", 100)]));

        assert_eq!(merger.messages().len(), 1);
    }

    #[test]
    fn repeated_inbound_never_grows_the_list() {
        let mut merger = MessageMerger::new(1);
        merger.seed(Ok(vec![message(1, 1, "a", 100), message(1, 2, "b", 200)]));

        for _ in 0..5 {
            for existing in merger.messages().to_vec() {
                assert!(!merger.accept(existing));
            }
        }

        assert_eq!(merger.messages().len(), 2);
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let mut merger = MessageMerger::new(1);
        merger.accept(message(1, 3, "late push", 250));
        merger.accept(message(1, 3, "early push", 50));
        merger.seed(Ok(vec![message(1, 1, "a", 100), message(1, 2, "b", 300)]));
        assert_eq!(timestamps(merger.messages()), vec![50, 100, 250, 300]);

        assert!(merger.accept(message(1, 4, "older than shown", 200)));

        assert_eq!(timestamps(merger.messages()), vec![50, 100, 200, 250, 300]);
    }

    #[test]
    fn same_timestamp_different_body_both_kept() {
        let mut merger = MessageMerger::new(1);
        merger.seed(Ok(Vec::new()));

        assert!(merger.accept(message(1, 1, "first", 100)));
        assert!(merger.accept(message(1, 1, "second", 100)));

        let bodies: Vec<_> = merger.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn other_conversations_are_ignored() {
        let mut a = MessageMerger::new(1);
        let mut b = MessageMerger::new(2);
        a.seed(Ok(vec![message(2, 1, "wrong history", 10)]));
        b.seed(Ok(Vec::new()));

        let event = message(2, 9, "for b", 100);
        assert!(!a.accept(event.clone()));
        assert!(b.accept(event));

        assert!(a.messages().is_empty());
        assert_eq!(b.messages().len(), 1);
    }

    #[test]
    fn failed_history_still_shows_live_messages() {
        let mut merger = MessageMerger::new(1);
        merger.accept(message(1, 7, "during fetch", 100));

        merger.seed(Err(HistoryError::Server {
            message: "boom".to_string(),
        }));
        merger.accept(message(1, 7, "after", 200));

        let state = merger.snapshot();
        assert!(matches!(state.history, HistoryStatus::Failed(_)));
        assert_eq!(timestamps(&state.messages), vec![100, 200]);
        assert!(!state.is_empty());
    }

    #[test]
    fn empty_state_only_after_history_settles() {
        let mut merger = MessageMerger::new(1);
        assert!(!merger.snapshot().is_empty());

        merger.seed(Ok(Vec::new()));

        assert!(merger.snapshot().is_empty());
    }

    #[test]
    fn second_seed_is_ignored() {
        let mut merger = MessageMerger::new(1);
        merger.seed(Ok(vec![message(1, 1, "a", 100)]));

        merger.seed(Ok(vec![message(1, 1, "b", 50)]));

        assert_eq!(merger.messages().len(), 1);
        assert_eq!(merger.messages()[0].body, "a");
    }

    fn assert_sorted_and_unique(messages: &[ChatMessage]) -> Result<(), TestCaseError> {
        prop_assert!(messages.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                prop_assert!(!a.is_duplicate_of(b), "duplicate retained: {a:?}");
            }
        }
        Ok(())
    }

    fn arb_message() -> impl Strategy<Value = ChatMessage> {
        (1i64..=2, 1i64..=3, prop::sample::select(vec!["a", "b", "c"]), 0i64..20)
            .prop_map(|(conversation_id, sender_id, body, timestamp)| {
                message(conversation_id, sender_id, body, timestamp)
            })
    }

    proptest! {
        #[test]
        fn any_interleaving_stays_sorted_and_deduplicated(
            history in prop::collection::vec(arb_message(), 0..20),
            live in prop::collection::vec(arb_message(), 0..30),
            split in any::<prop::sample::Index>(),
        ) {
            let mut merger = MessageMerger::new(1);
            let split = split.index(live.len() + 1);
            let (before, after) = live.split_at(split);

            for event in before {
                prop_assert!(!merger.accept(event.clone()));
                prop_assert!(merger.messages().is_empty());
            }
            merger.seed(Ok(history.clone()));
            assert_sorted_and_unique(merger.messages())?;

            for event in after {
                let len = merger.messages().len();
                let known = merger.messages().iter().any(|m| m.is_duplicate_of(event));
                let changed = merger.accept(event.clone());
                if known || event.conversation_id != 1 {
                    prop_assert!(!changed);
                    prop_assert_eq!(merger.messages().len(), len);
                } else {
                    prop_assert!(changed);
                    prop_assert_eq!(merger.messages().len(), len + 1);
                }
                assert_sorted_and_unique(merger.messages())?;
            }

            for existing in merger.messages().to_vec() {
                let len = merger.messages().len();
                prop_assert!(!merger.accept(existing));
                prop_assert_eq!(merger.messages().len(), len);
            }

            for input in history.iter().chain(live.iter()).filter(|m| m.conversation_id == 1) {
                prop_assert!(merger.messages().iter().any(|m| m.is_duplicate_of(input)));
            }
        }
    }

    #[tokio::test]
    async fn run_merge_buffers_until_history_resolves() {
        let (inbound_tx, inbound_rx) = broadcast::channel(16);
        let (publish_tx, mut publish_rx) = watch::channel(ConversationState::loading(1));
        let (history_tx, history_rx) = oneshot::channel::<Vec<ChatMessage>>();
        let history = async move { Ok::<_, HistoryError>(history_rx.await.unwrap_or_default()) };

        let task = tokio::spawn(run_merge(
            MessageMerger::new(1),
            history,
            inbound_rx,
            SessionTokenHolder::in_memory(),
            publish_tx,
        ));

        inbound_tx.send(message(1, 7, "hi", 1000)).unwrap();
        inbound_tx.send(message(2, 7, "elsewhere", 1001)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(publish_rx.borrow().history, HistoryStatus::Loading);

        history_tx.send(Vec::new()).unwrap();
        let state = timeout(Duration::from_secs(2), publish_rx.wait_for(|s| s.history == HistoryStatus::Loaded))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(state.messages, vec![message(1, 7, "hi", 1000)]);

        inbound_tx.send(message(1, 8, "earlier", 900)).unwrap();
        let state = timeout(Duration::from_secs(2), publish_rx.wait_for(|s| s.messages.len() == 2))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(timestamps(&state.messages), vec![900, 1000]);

        task.abort();
    }

    #[tokio::test]
    async fn unauthorized_history_clears_session() {
        let session = SessionTokenHolder::in_memory();
        session.set("T").unwrap();
        let (_inbound_tx, inbound_rx) = broadcast::channel(16);
        let (publish_tx, mut publish_rx) = watch::channel(ConversationState::loading(1));

        let task = tokio::spawn(run_merge(
            MessageMerger::new(1),
            async { Err::<Vec<ChatMessage>, _>(HistoryError::Unauthorized) },
            inbound_rx,
            session.clone(),
            publish_tx,
        ));

        timeout(
            Duration::from_secs(2),
            publish_rx.wait_for(|s| matches!(s.history, HistoryStatus::Failed(_))),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(session.token(), None);

        task.abort();
    }
}
