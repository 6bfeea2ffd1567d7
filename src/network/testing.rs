//! In-memory socket links for exercising the transport without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::channel::mpsc as frames;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::codec;
use super::client::TransportOptions;
use super::transport::{Connector, Socket};
use crate::error::TransportError;

pub const WAIT: Duration = Duration::from_secs(2);
pub const OPEN: &str = r#"0{"sid":"e1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

/// Server end of an in-memory link.
pub struct FakeServer {
    to_client: frames::UnboundedSender<Result<String, TransportError>>,
    from_client: frames::UnboundedReceiver<String>,
}

impl FakeServer {
    pub fn push(&self, frame: &str) {
        self.to_client
            .unbounded_send(Ok(frame.to_string()))
            .expect("client end dropped");
    }

    /// `None` once the client has closed the link.
    pub async fn next_frame(&mut self) -> Option<String> {
        timeout(WAIT, self.from_client.next())
            .await
            .expect("timed out waiting for client frame")
    }

    pub async fn handshake(&mut self, token: &str) {
        self.push(OPEN);
        let connect = self.next_frame().await.expect("no CONNECT packet");
        assert_eq!(connect, codec::encode_connect(token));
        self.push(r#"40{"sid":"s1"}"#);
    }
}

/// Hands every new link's server end to the test and counts attempts.
#[derive(Clone)]
pub struct FakeConnector {
    attempts: Arc<AtomicUsize>,
    servers: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    pub fn new() -> (Self, Arc<AtomicUsize>, mpsc::UnboundedReceiver<FakeServer>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (servers, server_rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts: attempts.clone(),
            servers,
        };
        (connector, attempts, server_rx)
    }

    /// Options with short reconnect delays.
    pub fn options() -> TransportOptions {
        let mut options = TransportOptions::new("ws://test/socket.io/?EIO=4&transport=websocket");
        options.reconnect_delay = Duration::from_millis(10);
        options.reconnect_delay_max = Duration::from_millis(40);
        options
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Socket, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (to_client, client_stream) = frames::unbounded();
        let (client_sink, from_client) = frames::unbounded::<String>();
        let _ = self.servers.send(FakeServer {
            to_client,
            from_client,
        });
        Box::pin(async move {
            Ok(Socket {
                sink: Box::pin(client_sink.sink_map_err(|_| TransportError::Closed)),
                stream: Box::pin(client_stream),
            })
        })
    }
}
