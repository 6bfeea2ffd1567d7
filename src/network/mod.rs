pub mod client;
pub mod codec;
pub mod history;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{RealtimeTransport, TransportHandle, TransportOptions};
pub use history::{HistoryFetcher, RestHistoryClient};
pub use transport::{Connector, Socket, WebSocketConnector, socket_endpoint};
