use std::time::Duration;

use futures::stream::{self, Stream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant};

use crate::common::{ChatMessage, ConnectionState, OutboundMessage, TransportCommand};
use crate::error::TransportError;

use super::codec::{self, Packet};
use super::transport::{Connector, Socket};

const DEFAULT_CHAT_EVENT: &str = "chat";
const DEFAULT_INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Full Engine.IO WebSocket URL, see [`super::socket_endpoint`].
    pub endpoint: String,
    pub chat_event: String,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    /// Bound on waiting for the Engine.IO open packet.
    pub handshake_timeout: Duration,
    pub inbound_capacity: usize,
}

impl TransportOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            chat_event: DEFAULT_CHAT_EVENT.to_string(),
            reconnect_delay: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(5000),
            handshake_timeout: Duration::from_millis(20000),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }

    /// Exponential backoff: `reconnect_delay * 2^attempt`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.reconnect_delay_max)
    }
}

/// Cloneable front of the transport task. All open conversations share the
/// one connection behind it; none of them can open or close it.
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    inbound: broadcast::Sender<ChatMessage>,
}

impl TransportHandle {
    /// Fire-and-forget. Dropped (and logged) when no connection is up.
    pub fn send(&self, message: OutboundMessage) {
        if let Err(err) = self.commands.send(TransportCommand::Send(message)) {
            log::warn!("Transport task is gone; dropping chat message: {err}");
        }
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(TransportCommand::Shutdown);
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Every transition, in order. Unlike the watch channel nothing is coalesced.
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Yields the current state, then every later transition in order.
    pub fn observe_connection_state(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        let transitions = self.transitions.subscribe();
        let current = *self.state.borrow();
        let later = stream::unfold(transitions, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(state) => return Some((state, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Connection state observer lagged, skipped {skipped} transitions");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        stream::iter([current]).chain(later)
    }

    pub fn subscribe_inbound(&self) -> broadcast::Receiver<ChatMessage> {
        self.inbound.subscribe()
    }

    /// Raw inbound chat events of every conversation.
    pub fn observe_inbound_messages(&self) -> impl Stream<Item = ChatMessage> + Send + 'static {
        stream::unfold(self.inbound.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Inbound observer lagged, skipped {skipped} messages");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}

enum Exit {
    TokenChanged,
    Shutdown,
}

enum LinkEnd {
    Dropped { was_connected: bool },
    /// The server refused or ended the session; retry only on a new token.
    Rejected,
    TokenChanged,
    Shutdown,
}

/// Owns the single socket link and follows the session token.
pub struct RealtimeTransport<C: Connector> {
    connector: C,
    options: TransportOptions,
    tokens: watch::Receiver<Option<String>>,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    inbound: broadcast::Sender<ChatMessage>,
}

impl<C: Connector> RealtimeTransport<C> {
    pub fn new(
        connector: C,
        options: TransportOptions,
        tokens: watch::Receiver<Option<String>>,
    ) -> (Self, TransportHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (transitions, _) = broadcast::channel(64);
        let (inbound, _) = broadcast::channel(options.inbound_capacity.max(1));

        let handle = TransportHandle {
            commands: command_tx,
            state: state_rx,
            transitions: transitions.clone(),
            inbound: inbound.clone(),
        };
        let transport = Self {
            connector,
            options,
            tokens,
            commands: command_rx,
            state: state_tx,
            transitions,
            inbound,
        };
        (transport, handle)
    }

    pub fn spawn(
        connector: C,
        options: TransportOptions,
        tokens: watch::Receiver<Option<String>>,
    ) -> TransportHandle {
        let (transport, handle) = Self::new(connector, options, tokens);
        tokio::spawn(transport.run());
        handle
    }

    pub async fn run(mut self) {
        log::info!("Realtime transport started for {}", self.options.endpoint);

        loop {
            let token = self.tokens.borrow_and_update().clone();
            let exit = match token {
                None => {
                    self.set_state(ConnectionState::Idle);
                    self.wait_for_token().await
                }
                Some(token) => self.run_session(&token).await,
            };
            if let Exit::Shutdown = exit {
                break;
            }
        }

        self.set_state(ConnectionState::Idle);
        log::info!("Realtime transport stopped");
    }

    /// Connection lifecycle for one token value.
    async fn run_session(&mut self, token: &str) -> Exit {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            log::info!("Connecting to {} (attempt {})", self.options.endpoint, attempt + 1);

            let end = match self.connect().await {
                Err(exit) => return exit,
                Ok(Ok(socket)) => self.drive(socket, token).await,
                Ok(Err(err)) => {
                    log::warn!("Socket connect failed: {err}");
                    LinkEnd::Dropped { was_connected: false }
                }
            };

            self.set_state(ConnectionState::Disconnected);
            match end {
                LinkEnd::TokenChanged => return Exit::TokenChanged,
                LinkEnd::Shutdown => return Exit::Shutdown,
                LinkEnd::Rejected => return self.wait_for_token().await,
                LinkEnd::Dropped { was_connected } => {
                    if was_connected {
                        attempt = 0;
                    }
                    let delay = self.options.backoff(attempt);
                    attempt = attempt.saturating_add(1);
                    log::info!("Reconnecting in {delay:?}");
                    if let Err(exit) = self.pause(delay).await {
                        return exit;
                    }
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<Result<Socket, TransportError>, Exit> {
        let mut pending = self.connector.connect(&self.options.endpoint);
        loop {
            tokio::select! {
                result = &mut pending => return Ok(result),
                changed = self.tokens.changed() => return Err(token_exit(changed)),
                command = self.commands.recv() => {
                    if let Some(exit) = self.handle_offline_command(command) {
                        return Err(exit);
                    }
                }
            }
        }
    }

    async fn wait_for_token(&mut self) -> Exit {
        loop {
            tokio::select! {
                changed = self.tokens.changed() => return token_exit(changed),
                command = self.commands.recv() => {
                    if let Some(exit) = self.handle_offline_command(command) {
                        return exit;
                    }
                }
            }
        }
    }

    async fn pause(&mut self, delay: Duration) -> Result<(), Exit> {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = self.tokens.changed() => return Err(token_exit(changed)),
                command = self.commands.recv() => {
                    if let Some(exit) = self.handle_offline_command(command) {
                        return Err(exit);
                    }
                }
            }
        }
    }

    /// Runs the Engine.IO/Socket.IO handshake and then pumps frames until the
    /// link ends. The link is closed before returning.
    async fn drive(&mut self, socket: Socket, token: &str) -> LinkEnd {
        let Socket {
            mut sink,
            mut stream,
        } = socket;
        let mut connected = false;
        // Until the CONNECT ack only the handshake timeout applies.
        let mut heartbeat = self.options.handshake_timeout;
        let mut link_window = heartbeat;
        let deadline = time::sleep(heartbeat);
        tokio::pin!(deadline);

        let end = loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(text)) => text,
                        Some(Err(err)) => {
                            log::warn!("Socket read failed: {err}");
                            break LinkEnd::Dropped { was_connected: connected };
                        }
                        None => {
                            log::info!("Socket closed by server");
                            break LinkEnd::Dropped { was_connected: connected };
                        }
                    };
                    log::debug!("<- {text}");

                    match codec::decode(&text) {
                        Ok(Packet::Open(info)) => {
                            link_window = Duration::from_millis(info.heartbeat_window_ms());
                            deadline
                                .as_mut()
                                .reset(Instant::now() + self.options.handshake_timeout);
                            if let Err(err) = sink.send(codec::encode_connect(token)).await {
                                log::warn!("Failed to send socket handshake: {err}");
                                break LinkEnd::Dropped { was_connected: connected };
                            }
                        }
                        Ok(Packet::Connect(_)) => {
                            connected = true;
                            heartbeat = link_window;
                            deadline.as_mut().reset(Instant::now() + heartbeat);
                            self.set_state(ConnectionState::Connected);
                        }
                        Ok(Packet::Ping) => {
                            deadline.as_mut().reset(Instant::now() + heartbeat);
                            if let Err(err) = sink.send(codec::PONG.to_string()).await {
                                log::warn!("Failed to answer ping: {err}");
                                break LinkEnd::Dropped { was_connected: connected };
                            }
                        }
                        Ok(Packet::Event { name, args }) if name == self.options.chat_event => {
                            self.publish_inbound(&args);
                        }
                        Ok(Packet::Event { name, .. }) => {
                            log::debug!("Ignoring socket event '{name}'");
                        }
                        Ok(Packet::ConnectError(message)) => {
                            log::warn!("Socket session rejected: {message}");
                            break LinkEnd::Rejected;
                        }
                        Ok(Packet::Disconnect) => {
                            log::info!("Server ended the socket session");
                            break LinkEnd::Rejected;
                        }
                        Ok(Packet::Close) => {
                            break LinkEnd::Dropped { was_connected: connected };
                        }
                        Ok(_) => {}
                        Err(err) => log::warn!("Dropping malformed frame: {err}"),
                    }
                }
                _ = &mut deadline => {
                    if connected {
                        log::warn!("No ping within {heartbeat:?}; link considered lost");
                    } else {
                        log::warn!("Socket handshake timed out");
                    }
                    break LinkEnd::Dropped { was_connected: connected };
                }
                changed = self.tokens.changed() => {
                    break match changed {
                        Ok(()) => LinkEnd::TokenChanged,
                        Err(_) => LinkEnd::Shutdown,
                    };
                }
                command = self.commands.recv() => match command {
                    Some(TransportCommand::Send(message)) if connected => {
                        match codec::encode_chat(&self.options.chat_event, &message) {
                            Ok(frame) => {
                                log::debug!("-> {frame}");
                                if let Err(err) = sink.send(frame).await {
                                    log::warn!("Failed to send chat message: {err}");
                                    break LinkEnd::Dropped { was_connected: connected };
                                }
                            }
                            Err(err) => log::warn!("Failed to encode chat message: {err}"),
                        }
                    }
                    Some(TransportCommand::Send(message)) => self.drop_unsent(&message),
                    Some(TransportCommand::Shutdown) | None => break LinkEnd::Shutdown,
                },
            }
        };

        if let Err(err) = sink.close().await {
            log::debug!("Socket close: {err}");
        }
        end
    }

    fn publish_inbound(&self, args: &[Value]) {
        match codec::decode_chat(args) {
            Ok(message) => {
                log::debug!(
                    "Chat message for conversation {} from {}",
                    message.conversation_id,
                    message.sender_id
                );
                // No subscribers simply means no conversation is open.
                let _ = self.inbound.send(message);
            }
            Err(err) => log::warn!("Dropping malformed chat event: {err}"),
        }
    }

    fn handle_offline_command(&self, command: Option<TransportCommand>) -> Option<Exit> {
        match command {
            Some(TransportCommand::Send(message)) => {
                self.drop_unsent(&message);
                None
            }
            Some(TransportCommand::Shutdown) | None => Some(Exit::Shutdown),
        }
    }

    fn drop_unsent(&self, message: &OutboundMessage) {
        log::warn!(
            "Not connected; dropping chat message for conversation {}",
            message.conversation_id
        );
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            log::info!("Connection state: {next:?}");
            let _ = self.transitions.send(next);
        }
    }
}

fn token_exit(changed: Result<(), watch::error::RecvError>) -> Exit {
    match changed {
        Ok(()) => Exit::TokenChanged,
        Err(_) => Exit::Shutdown,
    }
}
