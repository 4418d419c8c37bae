use super::*;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use async_trait::async_trait;

use crate::credentials::MemoryCredentials;
use crate::model::Message;
use crate::reconnect::ReconnectPolicy;
use crate::state::test_message;

// =============================================================================
// FAKE CONNECTOR
// =============================================================================

/// Server side of one fake connection.
struct Peer {
    events: mpsc::UnboundedReceiver<ClientEvent>,
    push: mpsc::UnboundedSender<ServerEvent>,
}

impl Peer {
    fn push(&self, event: ServerEvent) {
        self.push.send(event).expect("session side alive");
    }

    async fn next_event(&mut self) -> Option<ClientEvent> {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv()).await.ok().flatten()
    }
}

struct FakeConnector {
    script: Mutex<VecDeque<Result<(), ConnectError>>>,
    peers: mpsc::UnboundedSender<Peer>,
    attempts: AtomicU32,
    tokens: Mutex<Vec<String>>,
}

impl FakeConnector {
    fn new(script: Vec<Result<(), ConnectError>>) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into()),
            peers,
            attempts: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
        };
        (Arc::new(connector), peers_rx)
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, credential: &Credential) -> Result<Connection, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().expect("tokens").push(credential.token.clone());
        let next = self
            .script
            .lock()
            .expect("script")
            .pop_front()
            .unwrap_or_else(|| Err(ConnectError::Transport("unreachable".to_owned())));
        next?;

        let (outbound, events) = mpsc::unbounded_channel();
        let (push, inbound) = mpsc::unbounded_channel();
        let _ = self.peers.send(Peer { events, push });
        Ok(Connection { sid: Some("fake".to_owned()), outbound, inbound })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn config() -> ChatConfig {
    ChatConfig {
        reconnect: ReconnectPolicy { jitter: 0.0, ..ReconnectPolicy::default() },
        ..ChatConfig::default()
    }
}

fn credential() -> Credential {
    Credential { token: "tok".to_owned(), user_id: Some("1".to_owned()), username: Some("me".to_owned()) }
}

fn logged_in() -> Arc<MemoryCredentials> {
    Arc::new(MemoryCredentials::new(Some(credential())))
}

async fn wait_until<F>(session: &ChatSession, pred: F) -> ChatState
where
    F: FnMut(&ChatState) -> bool,
{
    let mut rx = session.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(300), rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("session state dropped");
    state.clone()
}

fn ids(state: &ChatState) -> Vec<String> {
    state.messages().iter().map(|m| m.id.clone()).collect()
}

fn history(messages: Vec<Message>) -> ServerEvent {
    let total = messages.len();
    ServerEvent::ChatHistory { messages, total }
}

/// Session connected through a fake peer that has already seen `get_history`.
async fn connected(
    script: Vec<Result<(), ConnectError>>,
) -> (ChatSession, Peer, Arc<FakeConnector>, Arc<MemoryCredentials>, mpsc::UnboundedReceiver<Peer>) {
    let (connector, mut peers) = FakeConnector::new(script);
    let store = logged_in();
    let session = ChatSession::new(config(), connector.clone(), store.clone());
    session.connect().expect("connect dispatched");

    let mut peer = peers.recv().await.expect("peer");
    assert_eq!(peer.next_event().await, Some(ClientEvent::GetHistory { limit: 50 }));
    wait_until(&session, |s| s.connection == ConnectionState::Connected).await;
    (session, peer, connector, store, peers)
}

// =============================================================================
// CONNECT
// =============================================================================

#[tokio::test(start_paused = true)]
async fn connect_without_credential_fails_fast() {
    let (connector, _peers) = FakeConnector::new(vec![Ok(())]);
    let session = ChatSession::new(config(), connector.clone(), Arc::new(MemoryCredentials::default()));

    assert_eq!(session.connect(), Err(ChatError::MissingCredential));
    let state = session.snapshot();
    assert_eq!(state.connection, ConnectionState::AuthError);
    assert!(state.auth_error.is_some());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_passes_token_and_requests_history() {
    let (session, peer, connector, _store, _peers) = connected(vec![Ok(())]).await;
    assert_eq!(connector.tokens.lock().expect("tokens").as_slice(), ["tok".to_owned()]);

    peer.push(history(vec![test_message("1", "ann", "a"), test_message("2", "bob", "b")]));
    peer.push(ServerEvent::NewMessage(test_message("3", "ann", "c")));
    let state = wait_until(&session, |s| s.messages().len() == 3).await;
    assert_eq!(ids(&state), vec!["1", "2", "3"]);
}

#[tokio::test(start_paused = true)]
async fn history_limit_comes_from_config() {
    let (connector, mut peers) = FakeConnector::new(vec![Ok(())]);
    let cfg = ChatConfig { history_limit: 20, ..config() };
    let session = ChatSession::new(cfg, connector, logged_in());
    session.connect().expect("connect");

    let mut peer = peers.recv().await.expect("peer");
    assert_eq!(peer.next_event().await, Some(ClientEvent::GetHistory { limit: 20 }));
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_ignored() {
    let (session, _peer, connector, _store, _peers) = connected(vec![Ok(())]).await;
    session.connect().expect("ignored, not an error");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.snapshot().connection, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_is_cleared_and_not_retried() {
    let (connector, _peers) = FakeConnector::new(vec![Err(ConnectError::Auth("HTTP 401".to_owned()))]);
    let store = logged_in();
    let session = ChatSession::new(config(), connector.clone(), store.clone());
    session.connect().expect("connect");

    let state = wait_until(&session, |s| s.connection == ConnectionState::AuthError).await;
    assert_eq!(state.auth_error.as_deref(), Some("HTTP 401"));
    assert!(store.load().expect("load").is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

// =============================================================================
// RECONNECT
// =============================================================================

#[tokio::test(start_paused = true)]
async fn transport_drop_reconnects_and_replaces_history() {
    let (session, peer, connector, _store, mut peers) = connected(vec![Ok(()), Ok(())]).await;
    peer.push(history(vec![test_message("1", "ann", "old")]));
    wait_until(&session, |s| s.messages().len() == 1).await;

    drop(peer);
    let state = wait_until(&session, |s| s.connection == ConnectionState::Disconnected).await;
    assert_eq!(state.reconnect_attempt, 1);

    let mut peer = peers.recv().await.expect("second peer");
    assert_eq!(peer.next_event().await, Some(ClientEvent::GetHistory { limit: 50 }));
    let state = wait_until(&session, |s| s.connection == ConnectionState::Connected).await;
    assert_eq!(state.reconnect_attempt, 0);
    assert_eq!(connector.attempts(), 2);

    peer.push(history(vec![test_message("9", "bob", "new")]));
    let state = wait_until(&session, |s| s.message("9").is_some()).await;
    assert_eq!(ids(&state), vec!["9"]);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_then_give_up() {
    let (connector, _peers) = FakeConnector::new(Vec::new());
    let cfg = ChatConfig {
        reconnect: ReconnectPolicy { max_attempts: 2, jitter: 0.0, ..ReconnectPolicy::default() },
        ..config()
    };
    let session = ChatSession::new(cfg, connector.clone(), logged_in());
    let started = Instant::now();
    session.connect().expect("connect");

    let state = wait_until(&session, |s| s.last_error.as_deref() == Some("not connected")).await;
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert_eq!(state.reconnect_attempt, 2);
    assert_eq!(connector.attempts(), 3);
    // 1 s then 2 s between attempts.
    assert!(Instant::now() - started >= Duration::from_secs(3));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_resets_the_budget() {
    let (connector, mut peers) = FakeConnector::new(Vec::new());
    let cfg = ChatConfig { reconnect: ReconnectPolicy::disabled(), ..config() };
    let session = ChatSession::new(cfg, connector.clone(), logged_in());
    session.connect().expect("connect");
    wait_until(&session, |s| s.last_error.is_some()).await;
    assert_eq!(connector.attempts(), 1);

    connector.script.lock().expect("script").push_back(Ok(()));
    session.reconnect().expect("reconnect");
    let mut peer = peers.recv().await.expect("peer");
    assert_eq!(peer.next_event().await, Some(ClientEvent::GetHistory { limit: 50 }));
    let state = wait_until(&session, |s| s.connection == ConnectionState::Connected).await;
    assert!(state.last_error.is_none());
}

// =============================================================================
// OPERATIONS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn operations_fail_while_disconnected() {
    let (connector, _peers) = FakeConnector::new(Vec::new());
    let session = ChatSession::new(config(), connector, logged_in());

    assert_eq!(session.send_message("hello"), Err(ChatError::NotConnected));
    assert_eq!(session.send_typing(true), Err(ChatError::NotConnected));
    assert_eq!(session.react_to_message("1", "👍"), Err(ChatError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn send_message_validates_then_dispatches_trimmed() {
    let (session, mut peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;

    assert_eq!(session.send_message("   "), Err(ValidationError::EmptyMessage.into()));
    let long = "x".repeat(1001);
    assert_eq!(
        session.send_message(&long),
        Err(ValidationError::MessageTooLong { len: 1001, max: 1000 }.into())
    );

    session.send_message("  gm  ").expect("dispatched");
    assert_eq!(peer.next_event().await, Some(ClientEvent::SendMessage { content: "gm".to_owned() }));
    // No local echo.
    assert!(session.snapshot().messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn typing_and_reactions_dispatch_when_connected() {
    let (session, mut peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;

    session.send_typing(true).expect("typing");
    assert_eq!(peer.next_event().await, Some(ClientEvent::Typing { typing: true }));

    assert_eq!(session.react_to_message("", "👍"), Err(ValidationError::MissingReactionTarget.into()));
    assert_eq!(session.react_to_message("1", " "), Err(ValidationError::MissingReactionTarget.into()));
    assert_eq!(
        session.react_to_message("1", &"🚀".repeat(11)),
        Err(ValidationError::EmojiTooLong { len: 11, max: 10 }.into())
    );

    session.react_to_message("1", "🚀").expect("react");
    assert_eq!(
        peer.next_event().await,
        Some(ClientEvent::ReactToMessage { message_id: "1".to_owned(), emoji: "🚀".to_owned() })
    );
}

// =============================================================================
// INBOUND EVENTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn duplicate_broadcasts_are_kept_once() {
    let (session, peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    for _ in 0..3 {
        peer.push(ServerEvent::NewMessage(test_message("5", "ann", "x")));
    }
    peer.push(ServerEvent::NewMessage(test_message("6", "ann", "y")));
    let state = wait_until(&session, |s| s.message("6").is_some()).await;
    assert_eq!(ids(&state), vec!["5", "6"]);
}

#[tokio::test(start_paused = true)]
async fn presence_is_last_write_wins() {
    let (session, peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    peer.push(ServerEvent::PresenceCount { count: 5 });
    peer.push(ServerEvent::PresenceCount { count: 3 });
    peer.push(ServerEvent::NewMessage(test_message("end", "ann", "sync")));
    let state = wait_until(&session, |s| s.message("end").is_some()).await;
    assert_eq!(state.online_count, 3);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_clears_at_ttl() {
    let (session, peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    peer.push(ServerEvent::TypingStatus { user_id: Some("2".to_owned()), username: "bob".to_owned(), typing: true });
    wait_until(&session, |s| s.typing_users() == vec!["bob".to_owned()]).await;

    tokio::time::sleep(Duration::from_millis(2999)).await;
    assert_eq!(session.snapshot().typing_users(), vec!["bob".to_owned()]);

    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_millis(5), rx.wait_for(|s| s.typing_users().is_empty()))
        .await
        .expect("indicator should clear at exactly the TTL")
        .expect("state alive");
}

#[tokio::test(start_paused = true)]
async fn own_typing_echo_is_ignored() {
    let (session, peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    peer.push(ServerEvent::TypingStatus { user_id: Some("1".to_owned()), username: "me".to_owned(), typing: true });
    peer.push(ServerEvent::PresenceCount { count: 9 });
    let state = wait_until(&session, |s| s.online_count == 9).await;
    assert!(state.typing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn server_error_is_reported_and_cleared_by_next_send() {
    let (session, mut peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    peer.push(ServerEvent::Error { message: "Message too long".to_owned() });
    let state = wait_until(&session, |s| s.last_error.is_some()).await;
    assert_eq!(state.connection, ConnectionState::Connected);

    session.send_message("shorter").expect("send");
    assert!(peer.next_event().await.is_some());
    wait_until(&session, |s| s.last_error.is_none()).await;
}

#[tokio::test(start_paused = true)]
async fn expired_token_event_clears_credential() {
    let (session, mut peer, connector, store, _peers) = connected(vec![Ok(())]).await;
    peer.push(ServerEvent::AuthError { message: "Token has expired".to_owned() });

    let state = wait_until(&session, |s| s.connection == ConnectionState::AuthError).await;
    assert_eq!(state.auth_error.as_deref(), Some("Token has expired"));
    assert!(store.load().expect("load").is_none());
    // Connection dropped, nothing retried.
    assert_eq!(peer.next_event().await, None);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);

    assert_eq!(session.reconnect(), Err(ChatError::MissingCredential));
}

// =============================================================================
// CLOSE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn close_is_terminal_and_drops_the_connection() {
    let (session, mut peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    peer.push(ServerEvent::TypingStatus { user_id: None, username: "bob".to_owned(), typing: true });
    wait_until(&session, |s| !s.typing_users().is_empty()).await;

    session.close();
    let state = session.snapshot();
    assert_eq!(state.connection, ConnectionState::Disconnected);
    assert!(state.typing_users().is_empty());
    assert!(session.is_closed());

    assert_eq!(peer.next_event().await, None);
    assert_eq!(session.send_message("hi"), Err(ChatError::Closed));
    assert_eq!(session.connect(), Err(ChatError::Closed));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_session_drops_the_connection() {
    let (session, mut peer, _connector, _store, _peers) = connected(vec![Ok(())]).await;
    drop(session);
    assert_eq!(peer.next_event().await, None);
}

/// Connector whose handshake holds its worker thread, so the driver is
/// mid-poll when `close` runs.
struct BlockingConnector {
    hold: Duration,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

#[async_trait]
impl Connector for BlockingConnector {
    async fn connect(&self, _credential: &Credential) -> Result<Connection, ConnectError> {
        std::thread::sleep(self.hold);
        let (outbound, events) = mpsc::unbounded_channel();
        let (_push, inbound) = mpsc::unbounded_channel();
        *self.events.lock().expect("events") = Some(events);
        Ok(Connection { sid: Some("slow".to_owned()), outbound, inbound })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_handshake_stays_disconnected() {
    let connector = Arc::new(BlockingConnector { hold: Duration::from_millis(300), events: Mutex::new(None) });
    let session = ChatSession::new(config(), connector.clone(), logged_in());
    session.connect().expect("connect dispatched");
    wait_until(&session, |s| s.connection == ConnectionState::Connecting).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.close();
    assert_eq!(session.snapshot().connection, ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.snapshot().connection, ConnectionState::Disconnected);

    let mut events = connector.events.lock().expect("events").take().expect("handshake finished");
    assert_eq!(events.try_recv(), Err(mpsc::error::TryRecvError::Disconnected));
}
