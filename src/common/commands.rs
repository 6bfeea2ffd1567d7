use super::types::OutboundMessage;

/// Commands sent from transport handles to the transport task.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Fire-and-forget publish of a chat event.
    Send(OutboundMessage),
    /// Close the link and stop the task.
    Shutdown,
}
