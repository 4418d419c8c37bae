//! Chat session: the handle UI code holds and the driver task behind it.
//!
//! SYSTEM CONTEXT
//! ==============
//! A `ChatSession` owns one driver task. The handle validates input, forwards
//! commands over a channel and exposes the state through a `watch` channel.
//! The driver is the only writer of `ChatState` apart from `close`. Every
//! driver write goes through `publish`, which is a no-op once the shared
//! `closed` flag is set, so a driver still mid-poll when `close` runs cannot
//! move the state back out of `Disconnected`.
//!
//! DESIGN
//! ======
//! The driver `select!`s over:
//! - local commands (connect, reconnect, emit)
//! - inbound server events from the live connection
//! - the retry timer (armed by `ReconnectPolicy` after a network failure)
//! - the typing-expiry timer (earliest indicator deadline)
//!
//! so every transition happens on one task, one event at a time.
//!
//! ERROR HANDLING
//! ==============
//! Network failures schedule a retry until the policy's budget is spent and
//! then park in `Disconnected` with `last_error = "not connected"`. Auth
//! failures clear the stored credential and park in `AuthError`; they are
//! never retried automatically.

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::credentials::{Credential, CredentialStore};
use crate::error::{ChatError, ValidationError};
use crate::event::{ClientEvent, ServerEvent};
use crate::model::ConnectionState;
use crate::state::{ChatState, LocalUser};
use crate::transport::{ConnectError, Connection, Connector};

const NOT_CONNECTED: &str = "not connected";

#[derive(Debug)]
enum Command {
    Connect,
    Reconnect,
    Emit(ClientEvent),
}

// =============================================================================
// HANDLE
// =============================================================================

pub struct ChatSession {
    id: Uuid,
    config: ChatConfig,
    credentials: Arc<dyn CredentialStore>,
    state: Arc<watch::Sender<ChatState>>,
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl ChatSession {
    /// Build a session and spawn its driver. Nothing connects until [`connect`](Self::connect).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: ChatConfig, connector: Arc<dyn Connector>, credentials: Arc<dyn CredentialStore>) -> Self {
        let id = Uuid::new_v4();
        let local_user = match credentials.load() {
            Ok(Some(credential)) => local_user_of(&credential),
            _ => LocalUser::default(),
        };
        let (state, _) = watch::channel(ChatState::from_config(&config, local_user));
        let state = Arc::new(state);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            config: config.clone(),
            connector,
            credentials: Arc::clone(&credentials),
            state: Arc::clone(&state),
            commands: commands_rx,
            connection: None,
            retry_at: None,
            closed: Arc::clone(&closed),
        };
        let span = tracing::info_span!("chat_session", session_id = %id);
        let driver = tokio::spawn(driver.run().instrument(span));

        Self { id, config, credentials, state, commands, driver, closed }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Receiver that observes every published state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// Start connecting with the stored credential.
    ///
    /// Ignored while already connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingCredential`] (and moves to `AuthError`)
    /// when no credential is stored, without attempting a connection.
    pub fn connect(&self) -> Result<(), ChatError> {
        self.ensure_open()?;
        if self.state.borrow().connection.is_busy() {
            tracing::debug!("connect ignored; already connecting or connected");
            return Ok(());
        }
        self.require_credential()?;
        self.dispatch(Command::Connect)
    }

    /// Manual retry: drops any live connection and reconnects with a fresh
    /// attempt budget.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn reconnect(&self) -> Result<(), ChatError> {
        self.ensure_open()?;
        self.require_credential()?;
        self.dispatch(Command::Reconnect)
    }

    /// Send a chat message. There is no local echo; the server's
    /// `new_message` broadcast is what lands in the list.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for empty or oversized content and
    /// [`ChatError::NotConnected`] unless connected.
    pub fn send_message(&self, content: &str) -> Result<(), ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let len = content.chars().count();
        if len > self.config.max_message_chars {
            return Err(ValidationError::MessageTooLong { len, max: self.config.max_message_chars }.into());
        }
        self.emit(ClientEvent::SendMessage { content: content.to_owned() })
    }

    /// Tell peers whether the local user is typing. Debouncing is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotConnected`] unless connected.
    pub fn send_typing(&self, typing: bool) -> Result<(), ChatError> {
        self.emit(ClientEvent::Typing { typing })
    }

    /// Toggle a reaction. State only changes when the server's
    /// `reaction_update` broadcast arrives.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a blank id or emoji or an oversized
    /// emoji, and [`ChatError::NotConnected`] unless connected.
    pub fn react_to_message(&self, message_id: &str, emoji: &str) -> Result<(), ChatError> {
        let message_id = message_id.trim();
        let emoji = emoji.trim();
        if message_id.is_empty() || emoji.is_empty() {
            return Err(ValidationError::MissingReactionTarget.into());
        }
        let len = emoji.chars().count();
        if len > self.config.max_emoji_chars {
            return Err(ValidationError::EmojiTooLong { len, max: self.config.max_emoji_chars }.into());
        }
        self.emit(ClientEvent::ReactToMessage { message_id: message_id.to_owned(), emoji: emoji.to_owned() })
    }

    /// Tear the session down: stops the driver (and every timer with it),
    /// drops the connection and leaves the state `Disconnected`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.driver.abort();
        self.state.send_modify(|s| s.set_connection(ConnectionState::Disconnected));
        tracing::info!(session_id = %self.id, "chat session closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ClientEvent) -> Result<(), ChatError> {
        self.ensure_open()?;
        if !self.state.borrow().connection.is_connected() {
            return Err(ChatError::NotConnected);
        }
        self.dispatch(Command::Emit(event))
    }

    fn dispatch(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).map_err(|_| ChatError::Closed)
    }

    fn ensure_open(&self) -> Result<(), ChatError> {
        if self.is_closed() { Err(ChatError::Closed) } else { Ok(()) }
    }

    fn require_credential(&self) -> Result<(), ChatError> {
        match self.credentials.load() {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                publish(&self.state, &self.closed, |s| {
                    s.fail_auth(ChatError::MissingCredential.to_string());
                    true
                });
                Err(ChatError::MissingCredential)
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential store unreadable");
                publish(&self.state, &self.closed, |s| {
                    s.fail_auth(e.to_string());
                    true
                });
                Err(ChatError::MissingCredential)
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Apply `update` unless the session is closed. `close` sets the flag before
/// its own write, so the watch lock orders a racing driver write before it or
/// turns it into a no-op.
fn publish(state: &watch::Sender<ChatState>, closed: &AtomicBool, update: impl FnOnce(&mut ChatState) -> bool) -> bool {
    state.send_if_modified(|s| !closed.load(Ordering::SeqCst) && update(s))
}

fn local_user_of(credential: &Credential) -> LocalUser {
    LocalUser { user_id: credential.user_id.clone(), username: credential.username.clone() }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    config: ChatConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    state: Arc<watch::Sender<ChatState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    connection: Option<Connection>,
    retry_at: Option<Instant>,
    closed: Arc<AtomicBool>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            if self.is_closed() {
                self.connection = None;
                break;
            }
            let typing_deadline = self.state.borrow().next_typing_deadline();
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd).await;
                }
                event = next_event(&mut self.connection) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        self.connection = None;
                        tracing::warn!("chat connection lost");
                        self.schedule_retry(NOT_CONNECTED.to_owned());
                    }
                },
                () = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    self.attempt().await;
                }
                () = sleep_until(typing_deadline) => {
                    self.publish_if(|s| s.expire_typing(Instant::now()));
                }
            }
        }
        tracing::debug!("chat session driver stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => {
                if self.connection.is_some() || self.state.borrow().connection.is_busy() {
                    return;
                }
                self.retry_at = None;
                self.publish(|s| s.reconnect_attempt = 0);
                self.attempt().await;
            }
            Command::Reconnect => {
                self.connection = None;
                self.retry_at = None;
                self.publish(|s| s.reconnect_attempt = 0);
                self.attempt().await;
            }
            Command::Emit(event) => {
                let Some(connection) = &self.connection else {
                    tracing::debug!(event = event.name(), "dropping event; not connected");
                    return;
                };
                if connection.emit(event) {
                    self.publish_if(|s| s.last_error.take().is_some());
                } else {
                    self.connection = None;
                    tracing::warn!("chat connection lost while emitting");
                    self.schedule_retry(NOT_CONNECTED.to_owned());
                }
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        if let ServerEvent::AuthError { message } = event {
            self.auth_failed(message);
            return;
        }
        if let ServerEvent::Error { message } = &event {
            tracing::warn!(%message, "server rejected a request");
        }
        let now = Instant::now();
        self.publish_if(|s| s.apply(event, now));
    }

    /// One connection attempt with whatever credential is stored now.
    async fn attempt(&mut self) {
        let credential = match self.credentials.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                self.auth_failed(ChatError::MissingCredential.to_string());
                return;
            }
            Err(e) => {
                self.auth_failed(e.to_string());
                return;
            }
        };

        let attempt = self.state.borrow().reconnect_attempt;
        tracing::info!(attempt, "connecting");
        self.publish(|s| {
            s.set_local_user(local_user_of(&credential));
            s.set_connection(ConnectionState::Connecting);
        });

        match self.connector.connect(&credential).await {
            Ok(connection) if self.is_closed() => {
                tracing::debug!(sid = connection.sid.as_deref().unwrap_or("-"), "session closed during connect; dropping connection");
            }
            Ok(connection) => {
                let limit = self.config.history_limit;
                if !connection.emit(ClientEvent::GetHistory { limit }) {
                    self.schedule_retry(NOT_CONNECTED.to_owned());
                    return;
                }
                tracing::info!(sid = connection.sid.as_deref().unwrap_or("-"), limit, "connected; history requested");
                self.connection = Some(connection);
                self.publish(|s| {
                    s.last_error = None;
                    s.set_connection(ConnectionState::Connected);
                });
            }
            Err(ConnectError::Auth(reason)) => self.auth_failed(reason),
            Err(ConnectError::Config(reason)) => {
                tracing::error!(%reason, "cannot connect");
                self.publish(|s| {
                    s.last_error = Some(reason);
                    s.set_connection(ConnectionState::Disconnected);
                });
            }
            Err(ConnectError::Transport(reason)) => {
                tracing::warn!(%reason, "connect failed");
                self.schedule_retry(reason);
            }
        }
    }

    /// Park in `Disconnected` and arm the retry timer if the budget allows.
    fn schedule_retry(&mut self, reason: String) {
        let attempt = self.state.borrow().reconnect_attempt.saturating_add(1);
        match self.config.reconnect.delay(attempt) {
            Some(delay) => {
                tracing::info!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), %reason, "scheduling reconnect");
                self.retry_at = Some(Instant::now() + delay);
                self.publish(|s| {
                    s.set_connection(ConnectionState::Disconnected);
                    s.reconnect_attempt = attempt;
                });
            }
            None => {
                tracing::warn!(attempts = attempt - 1, %reason, "reconnect budget exhausted");
                self.retry_at = None;
                self.publish(|s| {
                    s.set_connection(ConnectionState::Disconnected);
                    s.last_error = Some(NOT_CONNECTED.to_owned());
                });
            }
        }
    }

    fn auth_failed(&mut self, reason: String) {
        tracing::warn!(%reason, "authentication failed; clearing credential");
        if let Err(e) = self.credentials.clear() {
            tracing::error!(error = %e, "failed to clear credential");
        }
        self.connection = None;
        self.retry_at = None;
        self.publish(|s| s.fail_auth(reason));
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn publish(&self, update: impl FnOnce(&mut ChatState)) {
        publish(&self.state, &self.closed, |s| {
            update(s);
            true
        });
    }

    fn publish_if(&self, update: impl FnOnce(&mut ChatState) -> bool) {
        publish(&self.state, &self.closed, update);
    }
}

async fn next_event(connection: &mut Option<Connection>) -> Option<ServerEvent> {
    match connection {
        Some(connection) => connection.inbound.recv().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
