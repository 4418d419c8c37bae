//! Socket.IO over WebSocket: the production [`Connector`].
//!
//! DESIGN
//! ======
//! The handshake runs inline in `connect` so its outcome (auth refusal vs.
//! network failure) is returned to the caller. After that, one spawned I/O
//! task owns the socket and enters a `select!` loop:
//! - outbound `ClientEvent`s → Socket.IO event packets
//! - inbound text messages → Engine.IO/Socket.IO decode → `ServerEvent`s
//! - heartbeat deadline → transport considered lost
//!
//! LIFECYCLE
//! =========
//! 1. WebSocket upgrade to `/socket.io/?EIO=4&transport=websocket`
//!    (401/403 → auth failure)
//! 2. Read the Engine.IO `open` packet (sid, ping interval/timeout)
//! 3. Send `40{auth}`; `40{sid}` joins, `44{message}` is an auth failure
//! 4. Relay until either side goes away; dropping the session's end sends
//!    `41` and closes the socket

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use packets::{EnginePacket, OpenInfo, SocketPacket};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::ChatConfig;
use crate::credentials::Credential;
use crate::event::{ClientEvent, ServerEvent};
use crate::transport::{ConnectError, Connection, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

// =============================================================================
// CONNECTOR
// =============================================================================

#[derive(Clone, Debug)]
pub struct SocketIoConnector {
    base_url: String,
    connect_timeout: Duration,
}

impl SocketIoConnector {
    #[must_use]
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self { base_url: base_url.into(), connect_timeout }
    }

    #[must_use]
    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.base_url.clone(), config.connect_timeout)
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self, credential: &Credential) -> Result<Connection, ConnectError> {
        let url = socket_url(&self.base_url)?;
        let (stream, open) = tokio::time::timeout(self.connect_timeout, handshake(&url, credential))
            .await
            .map_err(|_| ConnectError::Transport("handshake timed out".to_owned()))??;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sid = open.sid.clone();
        tracing::info!(%sid, ping_interval = open.ping_interval, "socket.io connected");
        tokio::spawn(run_io(stream, open, outbound_rx, inbound_tx));

        Ok(Connection { sid: Some(sid), outbound: outbound_tx, inbound: inbound_rx })
    }
}

/// Map an HTTP(S) base URL to the Socket.IO WebSocket endpoint.
///
/// # Errors
///
/// Returns [`ConnectError::Config`] for any scheme other than `http`/`https`.
pub fn socket_url(base_url: &str) -> Result<String, ConnectError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{SOCKET_PATH}"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{SOCKET_PATH}"));
    }
    Err(ConnectError::Config(format!("unsupported base URL: {base_url}")))
}

// =============================================================================
// HANDSHAKE
// =============================================================================

async fn handshake(url: &str, credential: &Credential) -> Result<(WsStream, OpenInfo), ConnectError> {
    let (mut stream, _) = connect_async(url).await.map_err(upgrade_error)?;

    let open = match decode(&next_text(&mut stream).await?)? {
        EnginePacket::Open(info) => info,
        other => {
            return Err(ConnectError::Transport(format!("expected open packet, got {:?}", other.kind())));
        }
    };

    let connect = packets::encode_message(&SocketPacket::connect(Some(credential.auth_payload())));
    send_text(&mut stream, connect).await?;

    loop {
        match decode(&next_text(&mut stream).await?)? {
            EnginePacket::Ping(data) => {
                send_text(&mut stream, packets::encode_engine(&EnginePacket::Pong(data))).await?;
            }
            EnginePacket::Message(body) => {
                let packet = packets::decode_socket(&body).map_err(protocol_error)?;
                match packet {
                    SocketPacket::Connect { .. } => return Ok((stream, open)),
                    SocketPacket::ConnectError { data, .. } => {
                        return Err(ConnectError::Auth(message_of(&data)));
                    }
                    other => tracing::debug!(kind = ?other.kind(), "ignoring packet before connect ack"),
                }
            }
            EnginePacket::Close => {
                return Err(ConnectError::Transport("closed during handshake".to_owned()));
            }
            _ => {}
        }
    }
}

fn upgrade_error(error: tungstenite::Error) -> ConnectError {
    if let tungstenite::Error::Http(response) = &error {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return ConnectError::Auth(format!("HTTP {status}"));
        }
        return ConnectError::Transport(format!("HTTP {status}"));
    }
    ConnectError::Transport(error.to_string())
}

fn protocol_error(error: packets::CodecError) -> ConnectError {
    ConnectError::Transport(format!("protocol error: {error}"))
}

fn decode(text: &str) -> Result<EnginePacket, ConnectError> {
    packets::decode_engine(text).map_err(protocol_error)
}

fn message_of(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
        .unwrap_or("connection refused")
        .to_owned()
}

async fn next_text(stream: &mut WsStream) -> Result<String, ConnectError> {
    loop {
        let Some(message) = stream.next().await else {
            return Err(ConnectError::Transport("connection closed".to_owned()));
        };
        match message.map_err(|e| ConnectError::Transport(e.to_string()))? {
            Message::Text(text) => return Ok(text.as_str().to_owned()),
            Message::Close(_) => return Err(ConnectError::Transport("connection closed".to_owned())),
            _ => {}
        }
    }
}

async fn send_text(stream: &mut WsStream, text: String) -> Result<(), ConnectError> {
    stream
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))
}

// =============================================================================
// I/O LOOP
// =============================================================================

/// What one inbound transport message asks the I/O loop to do.
#[derive(Debug, PartialEq)]
enum Inbound {
    Ping(String),
    Event(ServerEvent),
    Closed,
    Ignore,
}

async fn run_io(
    mut stream: WsStream,
    open: OpenInfo,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
) {
    let heartbeat = Duration::from_millis(open.ping_interval.saturating_add(open.ping_timeout));
    let mut deadline = Instant::now() + heartbeat;
    let mut session_gone = false;

    loop {
        tokio::select! {
            cmd = outbound.recv() => {
                let Some(event) = cmd else {
                    session_gone = true;
                    break;
                };
                tracing::debug!(event = event.name(), "emit");
                let text = packets::encode_message(&event.to_packet());
                if send_text(&mut stream, text).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                let step = match msg {
                    Message::Text(text) => classify(text.as_str()),
                    Message::Close(_) => Inbound::Closed,
                    _ => Inbound::Ignore,
                };
                match step {
                    Inbound::Ping(data) => {
                        deadline = Instant::now() + heartbeat;
                        let pong = packets::encode_engine(&EnginePacket::Pong(data));
                        if send_text(&mut stream, pong).await.is_err() {
                            break;
                        }
                    }
                    Inbound::Event(event) => {
                        if inbound.send(event).is_err() {
                            session_gone = true;
                            break;
                        }
                    }
                    Inbound::Closed => break,
                    Inbound::Ignore => {}
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                tracing::warn!(timeout_ms = open.ping_interval.saturating_add(open.ping_timeout), "socket.io heartbeat timed out");
                break;
            }
            () = inbound.closed() => {
                session_gone = true;
                break;
            }
        }
    }

    if session_gone {
        let disconnect = packets::encode_message(&SocketPacket::Disconnect {
            namespace: packets::DEFAULT_NAMESPACE.to_owned(),
        });
        let _ = send_text(&mut stream, disconnect).await;
        let _ = stream.close(None).await;
        tracing::info!(sid = %open.sid, "socket.io disconnected");
    } else {
        tracing::warn!(sid = %open.sid, "socket.io transport lost");
    }
}

/// Decode one inbound text message.
fn classify(text: &str) -> Inbound {
    let packet = match packets::decode_engine(text) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable engine packet");
            return Inbound::Ignore;
        }
    };
    let body = match packet {
        EnginePacket::Ping(data) => return Inbound::Ping(data),
        EnginePacket::Close => return Inbound::Closed,
        EnginePacket::Message(body) => body,
        _ => return Inbound::Ignore,
    };
    match packets::decode_socket(&body) {
        Ok(SocketPacket::Event { name, args, .. }) => {
            let payload = args.into_iter().next().unwrap_or(Value::Null);
            match ServerEvent::parse(&name, &payload) {
                Ok(Some(event)) => Inbound::Event(event),
                Ok(None) => {
                    tracing::debug!(%name, "ignoring unhandled event");
                    Inbound::Ignore
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed event");
                    Inbound::Ignore
                }
            }
        }
        Ok(SocketPacket::Disconnect { .. }) => Inbound::Closed,
        Ok(SocketPacket::ConnectError { data, .. }) => {
            Inbound::Event(ServerEvent::AuthError { message: message_of(&data) })
        }
        Ok(other) => {
            tracing::debug!(kind = ?other.kind(), "ignoring socket packet");
            Inbound::Ignore
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable socket packet");
            Inbound::Ignore
        }
    }
}

#[cfg(test)]
#[path = "socketio_test.rs"]
mod tests;
