//! Chat session state and server-event application.
//!
//! SYSTEM CONTEXT
//! ==============
//! `ChatState` is the local projection of the chat channel: message history,
//! presence count, remote typing indicators and connection status. The
//! session driver is its only writer; UI code reads snapshots of it.
//!
//! DESIGN
//! ======
//! - Message order is arrival order; ids are unique (checked on insert).
//! - History replies replace the list wholesale, which is also how a
//!   reconnect resynchronizes.
//! - Presence is last-write-wins.
//! - Reactions are only ever applied from server broadcasts.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ChatConfig;
use crate::event::ServerEvent;
use crate::model::{ConnectionState, Message, ReactionUpdate};
use crate::typing::TypingSet;

/// Identity of the local user, used to keep them out of the typing set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalUser {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl LocalUser {
    fn is(&self, user_id: Option<&str>, username: &str) -> bool {
        let id_match = matches!((self.user_id.as_deref(), user_id), (Some(a), Some(b)) if a == b);
        id_match || self.username.as_deref() == Some(username)
    }
}

#[derive(Clone, Debug)]
pub struct ChatState {
    /// Current connection lifecycle state.
    pub connection: ConnectionState,
    /// Users online, as last reported by the server.
    pub online_count: u32,
    /// Latest server rejection (`error` event); cleared when an outbound event is dispatched.
    pub last_error: Option<String>,
    /// Reason the session needs a fresh login.
    pub auth_error: Option<String>,
    /// Automatic reconnect attempts made since the last successful connect.
    pub reconnect_attempt: u32,
    messages: Vec<Message>,
    ids: HashSet<String>,
    max_messages: usize,
    typing: TypingSet,
    local_user: LocalUser,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default(), LocalUser::default())
    }
}

impl ChatState {
    #[must_use]
    pub fn new(max_messages: usize, typing_ttl: Duration, local_user: LocalUser) -> Self {
        Self {
            connection: ConnectionState::Idle,
            online_count: 0,
            last_error: None,
            auth_error: None,
            reconnect_attempt: 0,
            messages: Vec::new(),
            ids: HashSet::new(),
            max_messages: max_messages.max(1),
            typing: TypingSet::new(typing_ttl),
            local_user,
        }
    }

    #[must_use]
    pub fn from_config(config: &ChatConfig, local_user: LocalUser) -> Self {
        Self::new(config.max_messages, config.typing_ttl, local_user)
    }

    /// Messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Remote users currently typing, sorted.
    #[must_use]
    pub fn typing_users(&self) -> Vec<String> {
        self.typing.users()
    }

    #[must_use]
    pub fn local_user(&self) -> &LocalUser {
        &self.local_user
    }

    pub fn set_local_user(&mut self, local_user: LocalUser) {
        if let Some(name) = &local_user.username {
            self.typing.stop(name);
        }
        self.local_user = local_user;
    }

    /// Apply one server event. Returns whether anything visible changed.
    pub fn apply(&mut self, event: ServerEvent, now: Instant) -> bool {
        match event {
            ServerEvent::ChatHistory { messages, .. } => {
                self.replace_history(messages);
                true
            }
            ServerEvent::NewMessage(message) => self.push_message(message),
            ServerEvent::PresenceCount { count }
            | ServerEvent::UserJoined { online_count: count, .. }
            | ServerEvent::UserLeft { online_count: count, .. } => {
                let changed = self.online_count != count;
                self.online_count = count;
                changed
            }
            ServerEvent::TypingStatus { user_id, username, typing } => {
                if self.local_user.is(user_id.as_deref(), &username) {
                    return false;
                }
                if typing {
                    let added = !self.typing.contains(&username);
                    self.typing.start(&username, now);
                    added
                } else {
                    self.typing.stop(&username)
                }
            }
            ServerEvent::ReactionUpdate(update) => self.apply_reaction(&update),
            ServerEvent::Error { message } => {
                self.last_error = Some(message);
                true
            }
            ServerEvent::AuthError { message } => {
                self.fail_auth(message);
                true
            }
        }
    }

    /// Replace the message list, keeping server order and dropping repeated ids.
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        for message in messages {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.evict_overflow();
    }

    /// Append a message unless its id is already present.
    pub fn push_message(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.evict_overflow();
        true
    }

    fn apply_reaction(&mut self, update: &ReactionUpdate) -> bool {
        // The message may have been evicted or not arrived yet; never synthesize it.
        let Some(message) = self.messages.iter_mut().find(|m| m.id == update.message_id) else {
            return false;
        };
        message.apply_reaction(update);
        true
    }

    fn evict_overflow(&mut self) {
        if self.messages.len() <= self.max_messages {
            return;
        }
        let excess = self.messages.len() - self.max_messages;
        for evicted in self.messages.drain(..excess) {
            self.ids.remove(&evicted.id);
        }
    }

    /// Drop expired typing indicators. Returns whether any were removed.
    pub fn expire_typing(&mut self, now: Instant) -> bool {
        !self.typing.expire(now).is_empty()
    }

    #[must_use]
    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.typing.next_deadline()
    }

    /// Move to `connection`; indicators are dropped whenever the channel is not live.
    pub fn set_connection(&mut self, connection: ConnectionState) {
        if connection != ConnectionState::Connected {
            self.typing.clear();
        }
        if connection == ConnectionState::Connected {
            self.reconnect_attempt = 0;
            self.auth_error = None;
        }
        self.connection = connection;
    }

    /// Fatal auth failure: terminal until a fresh credential connects.
    pub fn fail_auth(&mut self, reason: impl Into<String>) {
        self.auth_error = Some(reason.into());
        self.set_connection(ConnectionState::AuthError);
    }
}

#[cfg(test)]
pub(crate) fn test_message(id: &str, username: &str, content: &str) -> Message {
    Message {
        id: id.to_owned(),
        user_id: None,
        username: username.to_owned(),
        content: content.to_owned(),
        kind: "text".to_owned(),
        created_at: "2026-01-05T09:15:00".to_owned(),
        reactions: Vec::new(),
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
