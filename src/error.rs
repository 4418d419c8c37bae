//! Local error taxonomy for chat session operations.
//!
//! ERROR HANDLING
//! ==============
//! Validation failures are decided on the caller's side and never reach the
//! transport. Transport and auth failures are not returned from operations:
//! they land in the session state (`connection`, `auth_error`) where the UI
//! observes them. The one exception is `connect` without any stored
//! credential, which fails fast.

/// Input rejected before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content was empty after trimming.
    #[error("message cannot be empty")]
    EmptyMessage,
    /// Trimmed content exceeds the configured character limit.
    #[error("message too long ({len} characters, max {max})")]
    MessageTooLong { len: usize, max: usize },
    /// Reaction without a message id or without an emoji.
    #[error("reaction requires a message id and an emoji")]
    MissingReactionTarget,
    /// Emoji longer than the server accepts.
    #[error("emoji too long ({len} characters, max {max})")]
    EmojiTooLong { len: usize, max: usize },
}

/// Why a session operation was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No credential is stored; log in first.
    #[error("not logged in")]
    MissingCredential,
    /// The session is not in the `Connected` state.
    #[error("not connected")]
    NotConnected,
    /// The session has been closed; create a new one.
    #[error("session closed")]
    Closed,
}
