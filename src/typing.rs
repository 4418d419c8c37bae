//! Typing indicators: the remote set with per-user TTL, and the local
//! keystroke debounce that decides when to emit start/stop events.
//!
//! Both are clock-free: callers pass `now`, the session driver owns the timer.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_TYPING_TTL_MS;

/// Idle time after the last keystroke before a stop-typing event is due.
pub const DEFAULT_TYPING_IDLE_MS: u64 = 2000;

/// Remote users currently typing, each with an expiry deadline.
#[derive(Clone, Debug)]
pub struct TypingSet {
    ttl: Duration,
    deadlines: HashMap<String, Instant>,
}

impl Default for TypingSet {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TYPING_TTL_MS))
    }
}

impl TypingSet {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, deadlines: HashMap::new() }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Add `username` or push its deadline out to `now + ttl`.
    pub fn start(&mut self, username: &str, now: Instant) {
        self.deadlines.insert(username.to_owned(), now + self.ttl);
    }

    /// Remove `username`; returns whether it was present.
    pub fn stop(&mut self, username: &str) -> bool {
        self.deadlines.remove(username).is_some()
    }

    /// Drop every entry whose deadline is at or before `now`, returning the removed names.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.deadlines.remove(name);
        }
        expired
    }

    /// Earliest pending deadline, if anyone is typing.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.deadlines.contains_key(username)
    }

    /// Typing usernames, sorted for stable display.
    #[must_use]
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.deadlines.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

/// Keystroke debounce for the local user's typing indicator.
///
/// Start on the first keystroke, stop after `idle` without keystrokes or on
/// submit. Each method returns whether the caller should emit the
/// corresponding typing event.
#[derive(Clone, Debug)]
pub struct TypingDebounce {
    idle: Duration,
    last_keystroke: Option<Instant>,
}

impl Default for TypingDebounce {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TYPING_IDLE_MS))
    }
}

impl TypingDebounce {
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        Self { idle, last_keystroke: None }
    }

    /// Record a keystroke; `true` means "send typing=true".
    pub fn keystroke(&mut self, now: Instant) -> bool {
        self.last_keystroke.replace(now).is_none()
    }

    /// Check the idle timer; `true` means "send typing=false".
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.last_keystroke {
            Some(last) if now.saturating_duration_since(last) >= self.idle => {
                self.last_keystroke = None;
                true
            }
            _ => false,
        }
    }

    /// Message submitted; `true` means "send typing=false".
    pub fn submit(&mut self) -> bool {
        self.last_keystroke.take().is_some()
    }

    /// When [`poll`](Self::poll) will next report a stop, if typing.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.last_keystroke.map(|last| last + self.idle)
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.last_keystroke.is_some()
    }
}

#[cfg(test)]
#[path = "typing_test.rs"]
mod tests;
