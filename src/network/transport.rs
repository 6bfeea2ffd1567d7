use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One duplex text-frame link.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens socket links. The transport task owns at most one at a time.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Socket, TransportError>>;
}

/// Plain WebSocket links via `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Socket, TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws, response) = connect_async(url.as_str()).await?;
            log::debug!("WebSocket handshake with {url} ok ({})", response.status());

            let (sink, stream) = ws.split();
            let sink = sink
                .sink_map_err(TransportError::from)
                .with(|text: String| future::ready(Ok::<_, TransportError>(Message::text(text))));
            let stream = stream.filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError::from(err))),
                })
            });

            Ok(Socket {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Builds the Engine.IO WebSocket endpoint from the configured base URL,
/// e.g. `https://host` + `/socket.io/` → `wss://host/socket.io/?EIO=4&transport=websocket`.
pub fn socket_endpoint(base: &str, path: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        url: base.to_string(),
        reason,
    };

    let mut url = Url::parse(base).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch scheme to '{scheme}'")))?;

    let path = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    url.set_path(&path);
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url.to_string())
}
