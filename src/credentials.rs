//! Credential storage for the chat session.
//!
//! The session only ever loads and clears; `login` in the CLI saves. Stores
//! are shared between the session driver and the caller, hence `Send + Sync`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bearer token plus the identity it was issued for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Credential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), user_id: None, username: None }
    }

    /// Socket.IO connect payload: `{"token": .., "userId": ..}`.
    #[must_use]
    pub fn auth_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({ "token": self.token });
        if let Some(user_id) = &self.user_id {
            payload["userId"] = serde_json::Value::String(user_id.clone());
        }
        payload
    }
}

pub trait CredentialStore: Send + Sync {
    /// Current credential, if any. A blank token counts as absent.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if the backing storage cannot be read.
    fn load(&self) -> Result<Option<Credential>, CredentialError>;

    /// Replace the stored credential.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if the backing storage cannot be written.
    fn save(&self, credential: &Credential) -> Result<(), CredentialError>;

    /// Forget the stored credential. Clearing an empty store is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] if the backing storage cannot be removed.
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Process-local store; used by tests and embedders that manage tokens themselves.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    inner: Mutex<Option<Credential>>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new(credential: Option<Credential>) -> Self {
        Self { inner: Mutex::new(credential) }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Credential>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentials {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self.slot().clone().filter(|c| !c.token.trim().is_empty()))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        *self.slot() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.slot() = None;
        Ok(())
    }
}

/// JSON file store, e.g. `~/.config/tickerchat/credentials.json`.
#[derive(Clone, Debug)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentials {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let credential: Credential = serde_json::from_str(&raw)?;
        Ok(Some(credential).filter(|c| !c.token.trim().is_empty()))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let rendered = serde_json::to_string_pretty(credential)?;
        write_private(&self.path, rendered.as_bytes())?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `contents` readable by the owner only (0600 on unix), tightening an
/// existing file's mode as well.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
