//! Chat client configuration parsed from environment variables.
//!
//! Every knob has a default so a bare environment yields a working client
//! against a local backend. Unparseable values fall back to the default
//! rather than failing startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::reconnect::ReconnectPolicy;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
/// Server-side cap on `get_history` limits.
pub const MAX_HISTORY_LIMIT: u32 = 200;
pub const DEFAULT_MAX_MESSAGES: usize = 500;
pub const MAX_MESSAGE_CHARS: usize = 1000;
pub const MAX_EMOJI_CHARS: usize = 10;
pub const DEFAULT_TYPING_TTL_MS: u64 = 3000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 10_000;

const APP_DIR: &str = "tickerchat";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// HTTP base URL of the backend; the socket URL is derived from it.
    pub base_url: String,
    /// Messages requested by `get_history` on every (re)connect.
    pub history_limit: u32,
    /// Messages retained locally before the oldest are evicted.
    pub max_messages: usize,
    pub max_message_chars: usize,
    pub max_emoji_chars: usize,
    /// Lifetime of a typing indicator without a refresh.
    pub typing_ttl: Duration,
    /// Upper bound on the WebSocket + Socket.IO handshake.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Where the CLI keeps the bearer credential.
    pub credentials_path: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_message_chars: MAX_MESSAGE_CHARS,
            max_emoji_chars: MAX_EMOJI_CHARS,
            typing_ttl: Duration::from_millis(DEFAULT_TYPING_TTL_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            reconnect: ReconnectPolicy::default(),
            credentials_path: default_credentials_path(),
        }
    }
}

impl ChatConfig {
    /// Build config from process environment variables.
    ///
    /// Optional:
    /// - `TICKERCHAT_BASE_URL`: default `http://127.0.0.1:5000`
    /// - `TICKERCHAT_HISTORY_LIMIT`: default 50, clamped to 1..=200
    /// - `TICKERCHAT_MAX_MESSAGES`: default 500
    /// - `TICKERCHAT_TYPING_TTL_MS`: default 3000
    /// - `TICKERCHAT_CONNECT_TIMEOUT_SECS`: default 10
    /// - `TICKERCHAT_RECONNECT_ATTEMPTS`: default 5
    /// - `TICKERCHAT_RECONNECT_DELAY_MS`: default 1000
    /// - `TICKERCHAT_RECONNECT_MAX_DELAY_MS`: default 10000
    /// - `TICKERCHAT_CREDENTIALS`: default `<config dir>/tickerchat/credentials.json`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("TICKERCHAT_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        let history_limit =
            parse_or(&lookup, "TICKERCHAT_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        let max_messages = parse_or(&lookup, "TICKERCHAT_MAX_MESSAGES", DEFAULT_MAX_MESSAGES).max(1);
        let typing_ttl_ms = parse_or(&lookup, "TICKERCHAT_TYPING_TTL_MS", DEFAULT_TYPING_TTL_MS);
        let connect_timeout_secs = parse_or(&lookup, "TICKERCHAT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS);

        let reconnect = ReconnectPolicy {
            max_attempts: parse_or(&lookup, "TICKERCHAT_RECONNECT_ATTEMPTS", DEFAULT_RECONNECT_ATTEMPTS),
            initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "TICKERCHAT_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )),
            max_delay: Duration::from_millis(parse_or(
                &lookup,
                "TICKERCHAT_RECONNECT_MAX_DELAY_MS",
                DEFAULT_RECONNECT_MAX_DELAY_MS,
            )),
            ..ReconnectPolicy::default()
        };

        let credentials_path = lookup("TICKERCHAT_CREDENTIALS")
            .filter(|v| !v.is_empty())
            .map_or_else(default_credentials_path, PathBuf::from);

        Self {
            base_url,
            history_limit,
            max_messages,
            typing_ttl: Duration::from_millis(typing_ttl_ms),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            reconnect,
            credentials_path,
            ..Self::default()
        }
    }
}

/// `<config dir>/tickerchat/credentials.json`, falling back to the home
/// directory on platforms without a config dir.
fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_default()
        .join(APP_DIR)
        .join(CREDENTIALS_FILE)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
