use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tickerchat::{
    ApiClient, ApiError, ChatConfig, ChatError, ChatSession, ChatState, ConnectionState, CredentialError,
    CredentialStore, FileCredentials, Message, ReactionAction, SocketIoConnector, TypingDebounce,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in; run `tickerchat login` first")]
    NotLoggedIn,
    #[error("session needs a fresh login: {0}")]
    AuthRequired(String),
    #[error("timed out {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("credential store: {0}")]
    Credential(#[from] CredentialError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "tickerchat", about = "Market community chat client")]
struct Cli {
    #[arg(long, env = "TICKERCHAT_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "TICKERCHAT_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Log connection activity to stderr (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the credential.
    Login {
        #[arg(long, env = "TICKERCHAT_EMAIL")]
        email: String,
        #[arg(long, env = "TICKERCHAT_PASSWORD")]
        password: String,
    },
    /// Forget the stored credential.
    Logout,
    /// Print recent messages.
    History {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print how many users are online.
    Online,
    Report {
        message_id: String,
    },
    /// Delete one of your own messages.
    Delete {
        message_id: String,
    },
    /// Toggle a reaction on a message.
    React {
        message_id: String,
        emoji: String,
    },
    /// Interactive chat on stdin/stdout.
    Chat,
    /// Send one message and wait for the server to broadcast it back.
    Send {
        text: String,
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
        /// Post over REST instead of the live socket.
        #[arg(long, default_value_t = false)]
        rest: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let mut config = ChatConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(path) = cli.credentials {
        config.credentials_path = path;
    }
    let store = Arc::new(FileCredentials::new(config.credentials_path.clone()));
    tracing::debug!(path = %store.path().display(), "credential store");

    match cli.command {
        Command::Login { email, password } => run_login(&config, store.as_ref(), &email, &password).await,
        Command::Logout => {
            store.clear()?;
            println!("logged out ({} removed)", store.path().display());
            Ok(())
        }
        Command::History { json } => run_history(&config, store.as_ref(), json).await,
        Command::Online => {
            let count = with_auth(store.as_ref(), authed_client(&config, store.as_ref())?.online_count().await)?;
            println!("{count} online");
            Ok(())
        }
        Command::Report { message_id } => {
            let client = authed_client(&config, store.as_ref())?;
            let outcome = with_auth(store.as_ref(), client.report_message(&message_id).await)?;
            if outcome.deleted {
                println!("{} (message removed)", outcome.message);
            } else {
                println!("{}", outcome.message);
            }
            Ok(())
        }
        Command::Delete { message_id } => {
            let client = authed_client(&config, store.as_ref())?;
            with_auth(store.as_ref(), client.delete_message(&message_id).await)?;
            println!("deleted {message_id}");
            Ok(())
        }
        Command::React { message_id, emoji } => {
            let client = authed_client(&config, store.as_ref())?;
            let action = with_auth(store.as_ref(), client.react(&message_id, &emoji).await)?;
            let verb = match action {
                ReactionAction::Added => "added",
                ReactionAction::Removed => "removed",
            };
            println!("{emoji} {verb} on #{message_id}");
            Ok(())
        }
        Command::Chat => run_chat(config, store).await,
        Command::Send { text, rest: true, .. } => {
            let client = authed_client(&config, store.as_ref())?;
            let message = with_auth(store.as_ref(), client.send_message(text.trim()).await)?;
            println!("{}", format_message(&message));
            Ok(())
        }
        Command::Send { text, wait_secs, .. } => run_send(config, store, &text, Duration::from_secs(wait_secs)).await,
    }
}

// =============================================================================
// REST COMMANDS
// =============================================================================

async fn run_login(config: &ChatConfig, store: &dyn CredentialStore, email: &str, password: &str) -> Result<(), CliError> {
    let client = ApiClient::new(&config.base_url, None)?;
    let credential = client.login(email, password).await?;
    store.save(&credential)?;
    println!("logged in as {}", credential.username.as_deref().unwrap_or(email));
    Ok(())
}

async fn run_history(config: &ChatConfig, store: &dyn CredentialStore, json: bool) -> Result<(), CliError> {
    let client = authed_client(config, store)?;
    let recent = with_auth(store, client.recent_messages().await)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recent)?);
        return Ok(());
    }
    for message in &recent.messages {
        println!("{}", format_message(message));
    }
    println!("-- {} online", recent.online_count);
    Ok(())
}

fn authed_client(config: &ChatConfig, store: &dyn CredentialStore) -> Result<ApiClient, CliError> {
    let credential = store.load()?.ok_or(CliError::NotLoggedIn)?;
    Ok(ApiClient::new(&config.base_url, Some(credential.token))?)
}

/// An expired or rejected token is useless; drop it so the next run asks for
/// a login. A 403 only refuses that one action and keeps the credential.
fn with_auth<T>(store: &dyn CredentialStore, result: Result<T, ApiError>) -> Result<T, CliError> {
    match result {
        Err(e) if e.is_unauthorized() => {
            store.clear()?;
            Err(CliError::AuthRequired(e.to_string()))
        }
        other => Ok(other?),
    }
}

// =============================================================================
// SOCKET COMMANDS
// =============================================================================

fn open_session(config: ChatConfig, store: Arc<FileCredentials>) -> ChatSession {
    let connector = Arc::new(SocketIoConnector::from_config(&config));
    ChatSession::new(config, connector, store)
}

async fn run_chat(config: ChatConfig, store: Arc<FileCredentials>) -> Result<(), CliError> {
    let session = open_session(config, store);
    session.connect().map_err(login_hint)?;

    let mut state_rx = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = View::default();
    let mut debounce = TypingDebounce::default();
    let mut draft: Vec<String> = Vec::new();

    eprintln!("type a message and press enter; end a line with \\ to keep composing; /help for commands");
    let result = loop {
        let typing_deadline = debounce.deadline();
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = state_rx.borrow_and_update().clone();
                view.render(&state);
                if state.connection == ConnectionState::AuthError {
                    let reason = state.auth_error.unwrap_or_else(|| "authentication failed".to_owned());
                    break Err(CliError::AuthRequired(reason));
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break Ok(()) };
                match parse_input(&line) {
                    Input::Quit => break Ok(()),
                    Input::Help => eprintln!("/react <id> <emoji>  /reconnect  /quit"),
                    Input::Reconnect => report(session.reconnect()),
                    Input::React { message_id, emoji } => report(session.react_to_message(&message_id, &emoji)),
                    Input::Continue(text) => {
                        draft.push(text);
                        if debounce.keystroke(Instant::now()) {
                            let _ = session.send_typing(true);
                        }
                    }
                    Input::Text(text) => {
                        draft.push(text);
                        if debounce.submit() {
                            let _ = session.send_typing(false);
                        }
                        let content = draft.join("\n");
                        draft.clear();
                        if !content.trim().is_empty() {
                            report(session.send_message(&content));
                        }
                    }
                }
            }
            () = sleep_until(typing_deadline) => {
                if debounce.poll(Instant::now()) {
                    let _ = session.send_typing(false);
                }
            }
        }
    };

    session.close();
    result
}

async fn run_send(config: ChatConfig, store: Arc<FileCredentials>, text: &str, wait: Duration) -> Result<(), CliError> {
    let session = open_session(config, store);
    session.connect().map_err(login_hint)?;
    let mut state_rx = session.subscribe();

    let connected = tokio::time::timeout(
        wait,
        state_rx.wait_for(|s| s.connection.is_connected() || s.connection == ConnectionState::AuthError),
    )
    .await
    .map_err(|_| CliError::Timeout("waiting for the chat connection"))?
    .map_err(|_| ChatError::Closed)?
    .clone();
    if let Some(reason) = connected.auth_error {
        return Err(CliError::AuthRequired(reason));
    }

    let before: HashSet<String> = session.snapshot().messages().iter().map(|m| m.id.clone()).collect();
    session.send_message(text)?;
    let expected = text.trim().to_owned();

    let echoed = tokio::time::timeout(
        wait,
        state_rx.wait_for(|s| s.messages().iter().any(|m| !before.contains(&m.id) && m.content == expected)),
    )
    .await
    .map_err(|_| CliError::Timeout("waiting for the message broadcast"))?
    .map_err(|_| ChatError::Closed)?
    .clone();

    if let Some(message) = echoed.messages().iter().rev().find(|m| m.content == expected) {
        println!("{}", format_message(message));
    }
    session.close();
    Ok(())
}

fn login_hint(error: ChatError) -> CliError {
    match error {
        ChatError::MissingCredential => CliError::NotLoggedIn,
        other => CliError::Chat(other),
    }
}

fn report(result: Result<(), ChatError>) {
    if let Err(e) = result {
        eprintln!("! {e}");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// INPUT + RENDERING
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Text(String),
    /// Draft line ending in `\`; more lines follow.
    Continue(String),
    React { message_id: String, emoji: String },
    Reconnect,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if let Some(draft) = trimmed.strip_suffix('\\') {
        return Input::Continue(draft.to_owned());
    }
    let mut words = trimmed.split_whitespace();
    match words.next() {
        Some("/quit" | "/exit") => Input::Quit,
        Some("/reconnect") => Input::Reconnect,
        Some("/help") => Input::Help,
        Some("/react") => Input::React {
            message_id: words.next().unwrap_or_default().to_owned(),
            emoji: words.next().unwrap_or_default().to_owned(),
        },
        _ => Input::Text(trimmed.to_owned()),
    }
}

fn format_message(message: &Message) -> String {
    let time = message.created_at.get(11..16).unwrap_or("--:--");
    let mut line = format!("[{time}] #{} {}: {}", message.id, message.username, message.content);
    if !message.reactions.is_empty() {
        let reactions: Vec<String> = message.reactions.iter().map(|r| format!("{}{}", r.emoji, r.count())).collect();
        line.push_str("  ");
        line.push_str(&reactions.join(" "));
    }
    line
}

/// Prints only what changed since the previous state.
#[derive(Default)]
struct View {
    printed: HashSet<String>,
    connection: Option<ConnectionState>,
    online_count: Option<u32>,
    typing: Vec<String>,
    last_error: Option<String>,
}

impl View {
    fn render(&mut self, state: &ChatState) {
        for line in self.diff(state) {
            println!("{line}");
        }
    }

    fn diff(&mut self, state: &ChatState) -> Vec<String> {
        let mut out = Vec::new();
        if self.connection != Some(state.connection) {
            self.connection = Some(state.connection);
            let retry = if state.connection == ConnectionState::Disconnected && state.reconnect_attempt > 0 {
                format!(" (retry {})", state.reconnect_attempt)
            } else {
                String::new()
            };
            out.push(format!("* {}{retry}", state.connection.label()));
        }
        for message in state.messages() {
            if self.printed.insert(message.id.clone()) {
                out.push(format_message(message));
            }
        }
        if self.online_count != Some(state.online_count) && state.connection.is_connected() {
            self.online_count = Some(state.online_count);
            out.push(format!("* {} online", state.online_count));
        }
        let typing = state.typing_users();
        if typing != self.typing {
            if !typing.is_empty() {
                out.push(format!("* {} typing...", typing.join(", ")));
            }
            self.typing = typing;
        }
        if state.last_error != self.last_error {
            if let Some(error) = &state.last_error {
                out.push(format!("! {error}"));
            }
            self.last_error.clone_from(&state.last_error);
        }
        out
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
