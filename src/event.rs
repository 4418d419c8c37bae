//! Typed chat events on top of Socket.IO event packets.
//!
//! Inbound events are parsed from `(name, first argument)`; names the chat
//! client has no use for are ignored rather than treated as errors, so the
//! server can add events without breaking older clients.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::{Message, ReactionUpdate};

pub const EV_GET_HISTORY: &str = "get_history";
pub const EV_SEND_MESSAGE: &str = "send_message";
pub const EV_TYPING: &str = "typing";
pub const EV_REACT_MESSAGE: &str = "react_message";

pub const EV_CHAT_HISTORY: &str = "chat_history";
pub const EV_NEW_MESSAGE: &str = "new_message";
pub const EV_ONLINE_COUNT: &str = "online_count";
pub const EV_USER_JOINED: &str = "user_joined";
pub const EV_USER_LEFT: &str = "user_left";
pub const EV_USER_TYPING: &str = "user_typing";
pub const EV_REACTION_UPDATE: &str = "reaction_update";
pub const EV_ERROR: &str = "error";
pub const EV_AUTH_ERROR: &str = "auth_error";

/// Error returned by [`ServerEvent::parse`] for a known event with a bad payload.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid `{event}` payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Event pushed by the chat server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// Reply to `get_history`; oldest message first.
    ChatHistory { messages: Vec<Message>, total: usize },
    NewMessage(Message),
    PresenceCount { count: u32 },
    UserJoined { username: String, online_count: u32 },
    UserLeft { username: String, online_count: u32 },
    TypingStatus { user_id: Option<String>, username: String, typing: bool },
    ReactionUpdate(ReactionUpdate),
    /// Generic server rejection; the session stays connected.
    Error { message: String },
    /// Credential refused after the namespace was joined.
    AuthError { message: String },
}

impl ServerEvent {
    /// Parse an inbound event.
    ///
    /// Returns `Ok(None)` for event names this client does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Payload`] when a known event carries a payload of
    /// the wrong shape.
    pub fn parse(name: &str, payload: &Value) -> Result<Option<Self>, EventError> {
        let event = match name {
            EV_CHAT_HISTORY => {
                let raw: HistoryPayload = from_payload(EV_CHAT_HISTORY, payload)?;
                let messages = raw
                    .messages
                    .into_iter()
                    .filter_map(|item| match serde_json::from_value::<Message>(item) {
                        Ok(message) => Some(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed history entry");
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                let total = raw.total.unwrap_or(messages.len());
                Self::ChatHistory { messages, total }
            }
            EV_NEW_MESSAGE => Self::NewMessage(from_payload(EV_NEW_MESSAGE, payload)?),
            EV_ONLINE_COUNT => {
                let raw: CountPayload = from_payload(EV_ONLINE_COUNT, payload)?;
                Self::PresenceCount { count: raw.count }
            }
            EV_USER_JOINED => {
                let raw: PresencePayload = from_payload(EV_USER_JOINED, payload)?;
                Self::UserJoined { username: raw.username, online_count: raw.online_count }
            }
            EV_USER_LEFT => {
                let raw: PresencePayload = from_payload(EV_USER_LEFT, payload)?;
                Self::UserLeft { username: raw.username, online_count: raw.online_count }
            }
            EV_USER_TYPING => {
                let raw: TypingPayload = from_payload(EV_USER_TYPING, payload)?;
                Self::TypingStatus {
                    user_id: raw.user_id.as_ref().and_then(crate::model::id_from_value),
                    username: raw.username,
                    typing: raw.typing,
                }
            }
            EV_REACTION_UPDATE => Self::ReactionUpdate(from_payload(EV_REACTION_UPDATE, payload)?),
            EV_ERROR => Self::Error { message: message_of(payload, "server error") },
            EV_AUTH_ERROR => Self::AuthError { message: message_of(payload, "authentication failed") },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Event sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    GetHistory { limit: u32 },
    SendMessage { content: String },
    Typing { typing: bool },
    ReactToMessage { message_id: String, emoji: String },
}

impl ClientEvent {
    /// Wire event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetHistory { .. } => EV_GET_HISTORY,
            Self::SendMessage { .. } => EV_SEND_MESSAGE,
            Self::Typing { .. } => EV_TYPING,
            Self::ReactToMessage { .. } => EV_REACT_MESSAGE,
        }
    }

    /// Wire payload (the single event argument).
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::GetHistory { limit } => json!({ "limit": limit }),
            Self::SendMessage { content } => json!({ "content": content }),
            Self::Typing { typing } => json!({ "typing": typing }),
            Self::ReactToMessage { message_id, emoji } => {
                // The backend keys messages by integer id.
                let id = message_id
                    .parse::<i64>()
                    .map_or_else(|_| Value::String(message_id.clone()), Value::from);
                json!({ "message_id": id, "emoji": emoji })
            }
        }
    }

    /// Socket.IO packet carrying this event.
    #[must_use]
    pub fn to_packet(&self) -> packets::SocketPacket {
        packets::SocketPacket::event(self.name(), self.payload())
    }
}

#[derive(Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Deserialize)]
struct CountPayload {
    #[serde(alias = "online_count", alias = "onlineCount")]
    count: u32,
}

#[derive(Deserialize)]
struct PresencePayload {
    #[serde(default)]
    username: String,
    #[serde(alias = "onlineCount", alias = "count")]
    online_count: u32,
}

#[derive(Deserialize)]
struct TypingPayload {
    #[serde(default, alias = "userId")]
    user_id: Option<Value>,
    username: String,
    #[serde(default, alias = "isTyping")]
    typing: bool,
}

fn from_payload<T>(event: &'static str, payload: &Value) -> Result<T, EventError>
where
    T: serde::de::DeserializeOwned,
{
    T::deserialize(payload).map_err(|source| EventError::Payload { event, source })
}

fn message_of(payload: &Value, fallback: &str) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.as_str())
        .unwrap_or(fallback)
        .to_owned()
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
