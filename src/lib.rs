//! Real-time chat client for the market-community chat channel.
//!
//! `ChatSession` connects over Socket.IO, keeps a bounded, de-duplicated
//! message list plus presence and typing state, and reconnects on network
//! loss. `ApiClient` covers the REST side (login, history, moderation).

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod model;
pub mod reconnect;
pub mod session;
pub mod socketio;
pub mod state;
pub mod transport;
pub mod typing;

pub use api::{ApiClient, ApiError};
pub use config::ChatConfig;
pub use credentials::{Credential, CredentialError, CredentialStore, FileCredentials, MemoryCredentials};
pub use error::{ChatError, ValidationError};
pub use event::{ClientEvent, ServerEvent};
pub use model::{ConnectionState, Message, Reaction, ReactionAction, ReactionUpdate};
pub use reconnect::ReconnectPolicy;
pub use session::ChatSession;
pub use socketio::SocketIoConnector;
pub use state::{ChatState, LocalUser};
pub use transport::{ConnectError, Connection, Connector};
pub use typing::{TypingDebounce, TypingSet};
