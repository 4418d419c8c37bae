//! Chat domain types shared by the session, the REST client and the CLI.
//!
//! Ids are integers on the backend but strings in some payloads;
//! both are normalized to `String` on the way in.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Connection lifecycle of a chat session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, never asked to connect.
    #[default]
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Namespace joined; operations dispatch.
    Connected,
    /// Transport lost, connect failed, or session closed.
    Disconnected,
    /// Credential missing or refused; needs a fresh login.
    AuthError,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Whether a new connect request should be ignored.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::AuthError => "auth error",
        }
    }
}

/// A chat message as broadcast by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "userId", deserialize_with = "deserialize_opt_id")]
    pub user_id: Option<String>,
    pub username: String,
    pub content: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Server timestamp, verbatim (ISO-8601, possibly without offset).
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    #[serde(default, deserialize_with = "deserialize_reactions")]
    pub reactions: Vec<Reaction>,
}

/// One emoji on a message and the users who reacted with it, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub users: Vec<String>,
}

impl Reaction {
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    #[default]
    Added,
    Removed,
}

/// Server broadcast describing one reaction toggle.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReactionUpdate {
    #[serde(alias = "messageId", deserialize_with = "deserialize_id")]
    pub message_id: String,
    pub emoji: String,
    #[serde(default, alias = "userId", deserialize_with = "deserialize_opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub action: ReactionAction,
}

impl Message {
    /// Merge a reaction toggle into this message.
    ///
    /// Emoji order is first-seen order; an emoji whose last user is removed
    /// disappears from the list.
    pub fn apply_reaction(&mut self, update: &ReactionUpdate) {
        let idx = self.reactions.iter().position(|r| r.emoji == update.emoji);
        match update.action {
            ReactionAction::Added => {
                // An add with no user would leave an empty reaction behind.
                let Some(user) = &update.user_id else {
                    return;
                };
                let idx = idx.unwrap_or_else(|| {
                    self.reactions.push(Reaction { emoji: update.emoji.clone(), users: Vec::new() });
                    self.reactions.len() - 1
                });
                let users = &mut self.reactions[idx].users;
                if !users.contains(user) {
                    users.push(user.clone());
                }
            }
            ReactionAction::Removed => {
                let Some(idx) = idx else {
                    return;
                };
                if let Some(user) = &update.user_id {
                    self.reactions[idx].users.retain(|u| u != user);
                }
                if self.reactions[idx].users.is_empty() {
                    self.reactions.remove(idx);
                }
            }
        }
    }
}

fn default_kind() -> String {
    "text".to_owned()
}

/// Render a JSON id (string or number) as a string.
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {value}")))
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(id_from_value(&value))
}

/// Accepts `[{emoji, users}]` or `{emoji: [users]}`; anything else is empty.
fn deserialize_reactions<'de, D>(deserializer: D) -> Result<Vec<Reaction>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(reactions_from_value(&value))
}

fn reactions_from_value(value: &Value) -> Vec<Reaction> {
    let users_of = |v: Option<&Value>| {
        v.and_then(Value::as_array)
            .map(|items| items.iter().filter_map(id_from_value).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let emoji = item.get("emoji")?.as_str()?.to_owned();
                Some(Reaction { emoji, users: users_of(item.get("users")) })
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(emoji, users)| Reaction { emoji: emoji.clone(), users: users_of(Some(users)) })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
