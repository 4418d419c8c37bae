use super::*;
use crate::model::ReactionAction;

const TTL: Duration = Duration::from_secs(3);

fn state() -> ChatState {
    ChatState::new(500, TTL, LocalUser::default())
}

fn ids(state: &ChatState) -> Vec<&str> {
    state.messages().iter().map(|m| m.id.as_str()).collect()
}

fn typing(user_id: Option<&str>, username: &str, typing: bool) -> ServerEvent {
    ServerEvent::TypingStatus {
        user_id: user_id.map(str::to_owned),
        username: username.to_owned(),
        typing,
    }
}

fn reaction(message_id: &str, emoji: &str, user_id: &str, action: ReactionAction) -> ServerEvent {
    ServerEvent::ReactionUpdate(ReactionUpdate {
        message_id: message_id.to_owned(),
        emoji: emoji.to_owned(),
        user_id: Some(user_id.to_owned()),
        action,
    })
}

// =============================================================
// Messages
// =============================================================

#[test]
fn new_message_appends_after_history() {
    let now = Instant::now();
    let mut s = state();
    s.apply(
        ServerEvent::ChatHistory {
            messages: vec![test_message("1", "ann", "a"), test_message("2", "bob", "b")],
            total: 2,
        },
        now,
    );
    assert!(s.apply(ServerEvent::NewMessage(test_message("3", "ann", "c")), now));
    assert_eq!(ids(&s), vec!["1", "2", "3"]);
}

#[test]
fn duplicate_message_is_ignored() {
    let now = Instant::now();
    let mut s = state();
    assert!(s.apply(ServerEvent::NewMessage(test_message("7", "ann", "hi")), now));
    assert!(!s.apply(ServerEvent::NewMessage(test_message("7", "ann", "hi")), now));
    assert_eq!(s.messages().len(), 1);
}

#[test]
fn history_replaces_instead_of_merging() {
    let now = Instant::now();
    let mut s = state();
    s.push_message(test_message("old", "ann", "stale"));
    s.apply(
        ServerEvent::ChatHistory { messages: vec![test_message("1", "bob", "fresh")], total: 1 },
        now,
    );
    assert_eq!(ids(&s), vec!["1"]);
    assert!(s.message("old").is_none());
    // The evicted id no longer blocks a later insert.
    assert!(s.push_message(test_message("old", "ann", "back")));
}

#[test]
fn history_drops_repeated_ids() {
    let mut s = state();
    s.replace_history(vec![
        test_message("1", "ann", "a"),
        test_message("1", "ann", "a again"),
        test_message("2", "bob", "b"),
    ]);
    assert_eq!(ids(&s), vec!["1", "2"]);
    assert_eq!(s.message("1").map(|m| m.content.as_str()), Some("a"));
}

#[test]
fn overflow_evicts_oldest() {
    let mut s = ChatState::new(2, TTL, LocalUser::default());
    s.push_message(test_message("1", "ann", "a"));
    s.push_message(test_message("2", "ann", "b"));
    s.push_message(test_message("3", "ann", "c"));
    assert_eq!(ids(&s), vec!["2", "3"]);

    s.replace_history((10..15).map(|i| test_message(&i.to_string(), "bob", "x")).collect());
    assert_eq!(ids(&s), vec!["13", "14"]);
}

// =============================================================
// Presence
// =============================================================

#[test]
fn presence_is_last_write_wins() {
    let now = Instant::now();
    let mut s = state();
    s.apply(ServerEvent::PresenceCount { count: 5 }, now);
    s.apply(ServerEvent::PresenceCount { count: 3 }, now);
    assert_eq!(s.online_count, 3);

    s.apply(ServerEvent::UserJoined { username: "ann".to_owned(), online_count: 4 }, now);
    assert_eq!(s.online_count, 4);
    s.apply(ServerEvent::UserLeft { username: "ann".to_owned(), online_count: 2 }, now);
    assert_eq!(s.online_count, 2);
}

// =============================================================
// Typing
// =============================================================

#[test]
fn typing_indicator_expires_at_ttl() {
    let t0 = Instant::now();
    let mut s = state();
    assert!(s.apply(typing(Some("9"), "bob", true), t0));
    assert_eq!(s.typing_users(), vec!["bob".to_owned()]);
    assert_eq!(s.next_typing_deadline(), Some(t0 + TTL));

    assert!(!s.expire_typing(t0 + TTL - Duration::from_millis(1)));
    assert!(s.expire_typing(t0 + TTL));
    assert!(s.typing_users().is_empty());
}

#[test]
fn typing_false_removes_immediately() {
    let t0 = Instant::now();
    let mut s = state();
    s.apply(typing(None, "bob", true), t0);
    assert!(s.apply(typing(None, "bob", false), t0));
    assert!(s.typing_users().is_empty());
}

#[test]
fn local_user_never_shows_as_typing() {
    let t0 = Instant::now();
    let local = LocalUser { user_id: Some("1".to_owned()), username: Some("me".to_owned()) };
    let mut s = ChatState::new(500, TTL, local);

    assert!(!s.apply(typing(Some("1"), "renamed", true), t0));
    assert!(!s.apply(typing(None, "me", true), t0));
    assert!(s.typing_users().is_empty());
}

#[test]
fn setting_local_user_drops_their_indicator() {
    let t0 = Instant::now();
    let mut s = state();
    s.apply(typing(None, "me", true), t0);
    s.set_local_user(LocalUser { user_id: None, username: Some("me".to_owned()) });
    assert!(s.typing_users().is_empty());
}

#[test]
fn leaving_connected_clears_typing() {
    let t0 = Instant::now();
    let mut s = state();
    s.set_connection(ConnectionState::Connected);
    s.apply(typing(None, "bob", true), t0);
    s.set_connection(ConnectionState::Disconnected);
    assert!(s.typing_users().is_empty());
    assert!(s.next_typing_deadline().is_none());
}

// =============================================================
// Reactions
// =============================================================

#[test]
fn reaction_on_known_message_updates_it() {
    let now = Instant::now();
    let mut s = state();
    s.push_message(test_message("1", "ann", "gm"));
    assert!(s.apply(reaction("1", "🚀", "4", ReactionAction::Added), now));

    let reactions = &s.message("1").map(|m| m.reactions.clone()).unwrap_or_default();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].count(), 1);

    assert!(s.apply(reaction("1", "🚀", "4", ReactionAction::Removed), now));
    assert!(s.message("1").is_some_and(|m| m.reactions.is_empty()));
}

#[test]
fn reaction_on_missing_message_is_a_no_op() {
    let now = Instant::now();
    let mut s = state();
    s.push_message(test_message("1", "ann", "gm"));
    assert!(!s.apply(reaction("404", "👍", "4", ReactionAction::Added), now));
    assert_eq!(ids(&s), vec!["1"]);
    assert!(s.message("1").is_some_and(|m| m.reactions.is_empty()));
}

// =============================================================
// Errors and connection
// =============================================================

#[test]
fn error_event_sets_last_error_and_stays_connected() {
    let now = Instant::now();
    let mut s = state();
    s.set_connection(ConnectionState::Connected);
    s.apply(ServerEvent::Error { message: "Message too long".to_owned() }, now);
    assert_eq!(s.last_error.as_deref(), Some("Message too long"));
    assert_eq!(s.connection, ConnectionState::Connected);
}

#[test]
fn auth_error_event_is_terminal() {
    let now = Instant::now();
    let mut s = state();
    s.set_connection(ConnectionState::Connected);
    s.apply(ServerEvent::AuthError { message: "Token has expired".to_owned() }, now);
    assert_eq!(s.connection, ConnectionState::AuthError);
    assert_eq!(s.auth_error.as_deref(), Some("Token has expired"));
}

#[test]
fn connecting_successfully_resets_retry_bookkeeping() {
    let mut s = state();
    s.fail_auth("expired");
    s.reconnect_attempt = 3;
    s.set_connection(ConnectionState::Connected);
    assert_eq!(s.reconnect_attempt, 0);
    assert!(s.auth_error.is_none());
}
