//! Socket.IO v4 packet framing over the Engine.IO v4 WebSocket transport.
//!
//! Every WebSocket text frame is one Engine.IO packet; Engine.IO `message`
//! packets (`4…`) carry one Socket.IO packet. Only the subset the chat
//! channel needs is modelled: handshake, heartbeat, connect/disconnect and
//! text events. Binary attachments are rejected.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::common::{ChatMessage, OutboundMessage, WireChatMessage};
use crate::error::CodecError;

/// Engine.IO pong, sent in reply to every server ping.
pub const PONG: &str = "3";

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// Longest silence tolerated before the link is considered dead.
    pub fn heartbeat_window_ms(&self) -> u64 {
        self.ping_interval + self.ping_timeout
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Upgrade,
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    Ack,
    ConnectError(String),
}

pub fn decode(frame: &str) -> Result<Packet, CodecError> {
    let kind = frame.chars().next().ok_or(CodecError::Empty)?;
    let rest = &frame[kind.len_utf8()..];

    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '5' => Ok(Packet::Upgrade),
        '6' => Ok(Packet::Noop),
        other => Err(CodecError::UnknownPacket(other)),
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, CodecError> {
    let kind = body.chars().next().ok_or(CodecError::Empty)?;
    let mut rest = &body[kind.len_utf8()..];

    // Optional "/namespace," prefix.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(index) => &rest[index + 1..],
            None => "",
        };
    }

    // Optional ack id.
    let ack_len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest = &rest[ack_len..];

    match kind {
        '0' if rest.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(serde_json::from_str(rest)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(rest),
        '3' => Ok(Packet::Ack),
        '4' => Ok(Packet::ConnectError(connect_error_message(rest))),
        '5' | '6' => Err(CodecError::InvalidPayload(
            "binary packets are not supported".to_string(),
        )),
        other => Err(CodecError::UnknownPacket(other)),
    }
}

fn decode_event(payload: &str) -> Result<Packet, CodecError> {
    let values: Vec<Value> = serde_json::from_str(payload)?;
    let mut values = values.into_iter();
    match values.next() {
        Some(Value::String(name)) => Ok(Packet::Event {
            name,
            args: values.collect(),
        }),
        _ => Err(CodecError::InvalidPayload(
            "event without a name".to_string(),
        )),
    }
}

fn connect_error_message(payload: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        Ok(Value::String(message)) => message,
        _ => payload.to_string(),
    }
}

/// CONNECT packet carrying the session credential.
pub fn encode_connect(token: &str) -> String {
    format!("40{}", json!({ "Authorization": token }))
}

pub fn encode_event(name: &str, payload: Value) -> String {
    format!("42{}", Value::Array(vec![Value::String(name.to_string()), payload]))
}

/// The backend expects the chat payload as a JSON-encoded string argument.
pub fn encode_chat(event: &str, message: &OutboundMessage) -> Result<String, CodecError> {
    let payload = serde_json::to_string(message)?;
    Ok(encode_event(event, Value::String(payload)))
}

/// Decodes the first argument of an inbound chat event, given either as an
/// object or as a string holding the JSON object.
pub fn decode_chat(args: &[Value]) -> Result<ChatMessage, CodecError> {
    let wire: WireChatMessage = match args.first() {
        Some(Value::String(raw)) => serde_json::from_str(raw)?,
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())?,
        Some(other) => {
            return Err(CodecError::InvalidPayload(format!(
                "unexpected chat payload: {other}"
            )));
        }
        None => {
            return Err(CodecError::InvalidPayload(
                "chat event without payload".to_string(),
            ));
        }
    };
    ChatMessage::try_from(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_engine_open_packet() {
        let packet = decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();

        match packet {
            Packet::Open(info) => {
                assert_eq!(info.sid, "abc");
                assert_eq!(info.heartbeat_window_ms(), 45000);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn decodes_heartbeat_and_connect_ack() {
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(
            decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "xyz"})))
        );
        assert_eq!(decode("41").unwrap(), Packet::Disconnect);
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let packet = decode(r#"42/chat,17["chat",{"chatId":1}]"#).unwrap();

        assert_eq!(
            packet,
            Packet::Event {
                name: "chat".to_string(),
                args: vec![json!({"chatId": 1})],
            }
        );
    }

    #[test]
    fn connect_error_exposes_server_message() {
        assert_eq!(
            decode(r#"44{"message":"Unauthorized"}"#).unwrap(),
            Packet::ConnectError("Unauthorized".to_string())
        );
    }

    #[test]
    fn rejects_garbage_frames() {
        assert_eq!(decode(""), Err(CodecError::Empty));
        assert_eq!(decode("9"), Err(CodecError::UnknownPacket('9')));
        assert!(decode("42[1,2]").is_err());
        assert!(decode("42not json").is_err());
        assert!(decode("451-[\"chat\",{\"_placeholder\":true,\"num\":0}]").is_err());
    }

    #[test]
    fn chat_payload_is_sent_as_json_string() {
        let frame = encode_chat(
            "chat",
            &OutboundMessage {
                conversation_id: 1,
                sender_id: 7,
                body: "hi".to_string(),
            },
        )
        .unwrap();

        assert_eq!(
            frame,
            r#"42["chat","{\"chatId\":1,\"userId\":7,\"message\":\"hi\"}"]"#
        );
    }

    #[test]
    fn inbound_chat_accepts_object_or_string() {
        let object = json!({"chatId":1,"userId":7,"name":"A","message":"hi","timestamp":1000});
        let string = Value::String(object.to_string());

        let from_object = decode_chat(&[object]).unwrap();
        let from_string = decode_chat(&[string]).unwrap();

        assert_eq!(from_object, from_string);
        assert_eq!(from_object.body, "hi");
        assert_eq!(from_object.id, None);
    }

    #[test]
    fn inbound_chat_missing_fields_is_rejected() {
        let result = decode_chat(&[json!({"chatId":1,"message":"hi"})]);

        assert_eq!(result, Err(CodecError::MissingField { field: "userId" }));
        assert!(decode_chat(&[]).is_err());
        assert!(decode_chat(&[json!(5)]).is_err());
    }

    #[test]
    fn connect_packet_carries_authorization() {
        assert_eq!(encode_connect("T"), r#"40{"Authorization":"T"}"#);
    }
}
