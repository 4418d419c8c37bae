//! Connector seam between the session driver and the wire.
//!
//! A [`Connection`] is a pair of channels owned by an I/O task. The inbound
//! receiver closing means the transport is gone; dropping the outbound sender
//! asks the I/O task to disconnect and exit.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::credentials::Credential;
use crate::event::{ClientEvent, ServerEvent};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Credential refused (HTTP 401/403 or Socket.IO `connect_error`).
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Network, handshake or protocol failure; retryable.
    #[error("transport failed: {0}")]
    Transport(String),
    /// Misconfiguration (e.g. unsupported base URL scheme); retrying will not help.
    #[error("invalid connection config: {0}")]
    Config(String),
}

/// Live chat connection.
#[derive(Debug)]
pub struct Connection {
    /// Engine.IO session id, when the transport has one.
    pub sid: Option<String>,
    pub outbound: mpsc::UnboundedSender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Connection {
    /// Queue an event for the I/O task. Returns `false` once the transport is gone.
    pub fn emit(&self, event: ClientEvent) -> bool {
        self.outbound.send(event).is_ok()
    }
}

/// Opens chat connections. Implemented by the Socket.IO client and by test fakes.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection authenticated with `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Auth`] when the server refuses the credential,
    /// and [`ConnectError::Transport`] for anything worth retrying.
    async fn connect(&self, credential: &Credential) -> Result<Connection, ConnectError>;
}
