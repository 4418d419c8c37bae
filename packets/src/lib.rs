//! Engine.IO / Socket.IO packet model and text codec for the chat socket.
//!
//! This crate owns the wire representation spoken with the chat server:
//! Engine.IO v4 packets carried as WebSocket text messages, with Socket.IO v5
//! packets nested inside Engine.IO `message` packets. Payloads stay flexible
//! (`serde_json::Value`); typed events are built one layer up.
//!
//! Binary attachments (Socket.IO types 5 and 6) are never produced by the chat
//! server and are rejected rather than half-supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace used when a packet does not name one.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Error returned by the decoders.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Zero-length input.
    #[error("empty packet")]
    Empty,
    /// The leading character is not a known Engine.IO packet type.
    #[error("invalid engine.io packet type: {0:?}")]
    InvalidEngineType(char),
    /// The leading character is not a known Socket.IO packet type.
    #[error("invalid socket.io packet type: {0:?}")]
    InvalidSocketType(char),
    /// Binary event/ack packets are not supported on this transport.
    #[error("binary socket.io packets are not supported")]
    BinaryUnsupported,
    /// The ack id digits overflowed.
    #[error("invalid ack id: {0}")]
    InvalidAckId(String),
    /// The JSON section of a packet failed to parse.
    #[error("invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
    /// An event packet whose payload is not `[name, ...args]`.
    #[error("event packet is missing its name")]
    MissingEventName,
    /// A packet that requires a payload arrived without one.
    #[error("{0} packet is missing its payload")]
    MissingPayload(&'static str),
}

/// Engine.IO packet type, the first character of every transport message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineType {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
}

impl EngineType {
    /// Wire character for this type.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }

    fn from_char(c: char) -> Result<Self, CodecError> {
        match c {
            '0' => Ok(Self::Open),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(CodecError::InvalidEngineType(other)),
        }
    }
}

/// Socket.IO packet type, the first character inside an Engine.IO message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl SocketType {
    /// Wire character for this type.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
        }
    }

    fn from_char(c: char) -> Result<Self, CodecError> {
        match c {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::ConnectError),
            '5' | '6' => Err(CodecError::BinaryUnsupported),
            other => Err(CodecError::InvalidSocketType(other)),
        }
    }
}

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the server would upgrade to (empty over WebSocket).
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong; the client uses it the other way round.
    pub ping_timeout: u64,
    /// Largest accepted payload in bytes, when advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// One Engine.IO packet.
#[derive(Clone, Debug, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    /// Opaque message body; for chat traffic this is an encoded [`SocketPacket`].
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Packet type of this value.
    #[must_use]
    pub fn kind(&self) -> EngineType {
        match self {
            Self::Open(_) => EngineType::Open,
            Self::Close => EngineType::Close,
            Self::Ping(_) => EngineType::Ping,
            Self::Pong(_) => EngineType::Pong,
            Self::Message(_) => EngineType::Message,
            Self::Upgrade => EngineType::Upgrade,
            Self::Noop => EngineType::Noop,
        }
    }
}

/// One Socket.IO packet.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect; from the client `data` is the auth payload, from the server it holds the sid.
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, id: Option<u64>, name: String, args: Vec<Value> },
    Ack { namespace: String, id: u64, args: Vec<Value> },
    /// Namespace connect refused by the server; `data` is usually `{"message": ...}`.
    ConnectError { namespace: String, data: Value },
}

impl SocketPacket {
    /// Event on the default namespace with a single JSON argument.
    #[must_use]
    pub fn event(name: &str, payload: Value) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            id: None,
            name: name.to_owned(),
            args: vec![payload],
        }
    }

    /// Connect to the default namespace, optionally with an auth payload.
    #[must_use]
    pub fn connect(auth: Option<Value>) -> Self {
        Self::Connect { namespace: DEFAULT_NAMESPACE.to_owned(), data: auth }
    }

    /// Packet type of this value.
    #[must_use]
    pub fn kind(&self) -> SocketType {
        match self {
            Self::Connect { .. } => SocketType::Connect,
            Self::Disconnect { .. } => SocketType::Disconnect,
            Self::Event { .. } => SocketType::Event,
            Self::Ack { .. } => SocketType::Ack,
            Self::ConnectError { .. } => SocketType::ConnectError,
        }
    }
}

/// Encode an Engine.IO packet as a transport text message.
#[must_use]
pub fn encode_engine(packet: &EnginePacket) -> String {
    let mut out = String::new();
    out.push(packet.kind().as_char());
    match packet {
        // Serializing a plain struct of strings and integers cannot fail.
        EnginePacket::Open(info) => out.push_str(&serde_json::to_string(info).unwrap_or_default()),
        EnginePacket::Ping(data) | EnginePacket::Pong(data) | EnginePacket::Message(data) => out.push_str(data),
        EnginePacket::Close | EnginePacket::Upgrade | EnginePacket::Noop => {}
    }
    out
}

/// Decode a transport text message into an Engine.IO packet.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for empty input, [`CodecError::InvalidEngineType`]
/// for an unknown type character and [`CodecError::Json`] for a malformed open payload.
pub fn decode_engine(text: &str) -> Result<EnginePacket, CodecError> {
    let mut chars = text.chars();
    let first = chars.next().ok_or(CodecError::Empty)?;
    let body = chars.as_str();
    match EngineType::from_char(first)? {
        EngineType::Open => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
        EngineType::Close => Ok(EnginePacket::Close),
        EngineType::Ping => Ok(EnginePacket::Ping(body.to_owned())),
        EngineType::Pong => Ok(EnginePacket::Pong(body.to_owned())),
        EngineType::Message => Ok(EnginePacket::Message(body.to_owned())),
        EngineType::Upgrade => Ok(EnginePacket::Upgrade),
        EngineType::Noop => Ok(EnginePacket::Noop),
    }
}

/// Encode a Socket.IO packet (without the Engine.IO `4` prefix).
#[must_use]
pub fn encode_socket(packet: &SocketPacket) -> String {
    let mut out = String::new();
    out.push(packet.kind().as_char());
    let namespace = match packet {
        SocketPacket::Connect { namespace, .. }
        | SocketPacket::Disconnect { namespace }
        | SocketPacket::Event { namespace, .. }
        | SocketPacket::Ack { namespace, .. }
        | SocketPacket::ConnectError { namespace, .. } => namespace,
    };
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        out.push(',');
    }
    match packet {
        SocketPacket::Connect { data, .. } => {
            if let Some(data) = data {
                out.push_str(&data.to_string());
            }
        }
        SocketPacket::Disconnect { .. } => {}
        SocketPacket::Event { id, name, args, .. } => {
            if let Some(id) = id {
                out.push_str(&id.to_string());
            }
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            out.push_str(&Value::Array(items).to_string());
        }
        SocketPacket::Ack { id, args, .. } => {
            out.push_str(&id.to_string());
            out.push_str(&Value::Array(args.clone()).to_string());
        }
        SocketPacket::ConnectError { data, .. } => out.push_str(&data.to_string()),
    }
    out
}

/// Decode a Socket.IO packet (the body of an Engine.IO `message`).
///
/// # Errors
///
/// Returns a [`CodecError`] for unknown or binary packet types, bad ack ids,
/// malformed JSON, or event packets without a leading name.
pub fn decode_socket(text: &str) -> Result<SocketPacket, CodecError> {
    let mut chars = text.chars();
    let first = chars.next().ok_or(CodecError::Empty)?;
    let kind = SocketType::from_char(first)?;
    let rest = chars.as_str();

    let (namespace, rest) = split_namespace(rest);
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let (id_text, json_text) = rest.split_at(digits);
    let id = if id_text.is_empty() {
        None
    } else {
        Some(
            id_text
                .parse::<u64>()
                .map_err(|_| CodecError::InvalidAckId(id_text.to_owned()))?,
        )
    };
    let data = if json_text.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(json_text)?)
    };

    match kind {
        SocketType::Connect => Ok(SocketPacket::Connect { namespace, data }),
        SocketType::Disconnect => Ok(SocketPacket::Disconnect { namespace }),
        SocketType::Event => {
            let Some(Value::Array(mut items)) = data else {
                return Err(CodecError::MissingEventName);
            };
            if items.is_empty() {
                return Err(CodecError::MissingEventName);
            }
            let Value::String(name) = items.remove(0) else {
                return Err(CodecError::MissingEventName);
            };
            Ok(SocketPacket::Event { namespace, id, name, args: items })
        }
        SocketType::Ack => {
            let id = id.ok_or(CodecError::MissingPayload("ack"))?;
            let args = match data {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            Ok(SocketPacket::Ack { namespace, id, args })
        }
        SocketType::ConnectError => {
            let data = data.ok_or(CodecError::MissingPayload("connect_error"))?;
            Ok(SocketPacket::ConnectError { namespace, data })
        }
    }
}

/// Encode a Socket.IO packet wrapped in an Engine.IO `message` packet.
#[must_use]
pub fn encode_message(packet: &SocketPacket) -> String {
    encode_engine(&EnginePacket::Message(encode_socket(packet)))
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (DEFAULT_NAMESPACE.to_owned(), rest);
    }
    match rest.find(',') {
        Some(idx) => (rest[..idx].to_owned(), &rest[idx + 1..]),
        None => (rest.to_owned(), ""),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
