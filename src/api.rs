//! REST client for the chat backend's auth and chat endpoints.
//!
//! Thin reqwest wrapper. Status handling and body parsing are plain functions
//! over `(status, body)` so they can be tested without a server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Credential;
use crate::model::{Message, ReactionAction};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
    #[error("http request failed: {0}")]
    Request(String),
    /// 401: the token is missing or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// 403: the token is fine but the action is not allowed for this user.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// `GET /api/chat/messages` reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMessages {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub online_count: u32,
    #[serde(default)]
    pub typing_users: Vec<String>,
}

/// `POST /api/chat/report/{id}` reply.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReportOutcome {
    #[serde(default)]
    pub message: String,
    /// The report pushed the message over the auto-delete threshold.
    #[serde(default)]
    pub deleted: bool,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), token })
    }

    /// Exchange email and password for a credential.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] for bad credentials and
    /// [`ApiError::MissingField`] if the reply has no token.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let value = self.request(reqwest::Method::POST, "/api/auth/login", Some(body)).await?;
        parse_login(&value)
    }

    /// Recent messages, online count and typing users.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or a non-success status.
    pub async fn recent_messages(&self) -> Result<RecentMessages, ApiError> {
        let value = self.request(reqwest::Method::GET, "/api/chat/messages", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Post a message over REST, for when the socket is unavailable.
    /// Returns the stored message as the server echoes it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Status`] when the server rejects the content and
    /// [`ApiError::MissingField`] if the reply carries no message.
    pub async fn send_message(&self, content: &str) -> Result<Message, ApiError> {
        let body = serde_json::json!({ "content": content, "type": "text" });
        let value = self.request(reqwest::Method::POST, "/api/chat/send", Some(body)).await?;
        parse_sent(value)
    }

    /// Toggle a reaction over REST. Returns whether it was added or removed.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or a non-success status.
    pub async fn react(&self, message_id: &str, emoji: &str) -> Result<ReactionAction, ApiError> {
        let path = format!("/api/chat/react/{message_id}");
        let body = serde_json::json!({ "emoji": emoji });
        let value = self.request(reqwest::Method::POST, &path, Some(body)).await?;
        Ok(parse_react(&value))
    }

    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or a non-success status.
    pub async fn online_count(&self) -> Result<u32, ApiError> {
        let value = self.request(reqwest::Method::GET, "/api/chat/online", None).await?;
        value
            .get("online_count")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(ApiError::MissingField("online_count"))
    }

    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or a non-success status.
    pub async fn report_message(&self, message_id: &str) -> Result<ReportOutcome, ApiError> {
        let path = format!("/api/chat/report/{message_id}");
        let value = self.request(reqwest::Method::POST, &path, Some(Value::Object(serde_json::Map::new()))).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Delete one of the caller's own messages.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Forbidden`] when the message belongs to someone else.
    pub async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/chat/delete/{message_id}");
        self.request(reqwest::Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn request(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let url = endpoint(&self.base_url, path);
        tracing::debug!(%method, %url, "api request");

        let mut request = self.http.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(json) = body {
            request = request.json(&json);
        }

        let response = request.send().await.map_err(|e| ApiError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ApiError::Request(e.to_string()))?;
        check_response(status, &text)
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Map a raw reply to its JSON body or a typed error.
fn check_response(status: u16, body: &str) -> Result<Value, ApiError> {
    let value = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
    match status {
        200..=299 => Ok(value),
        401 => Err(ApiError::Unauthorized(error_message(&value, status))),
        403 => Err(ApiError::Forbidden(error_message(&value, status))),
        _ => Err(ApiError::Status { status, message: error_message(&value, status) }),
    }
}

fn error_message(value: &Value, status: u16) -> String {
    ["error", "msg", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map_or_else(|| format!("HTTP {status}"), ToOwned::to_owned)
}

fn parse_sent(mut value: Value) -> Result<Message, ApiError> {
    match value.get_mut("message").map(Value::take) {
        Some(message) if message.is_object() => Ok(serde_json::from_value(message)?),
        _ => Err(ApiError::MissingField("message")),
    }
}

/// The toggle endpoint only says which way it went in its message text.
fn parse_react(value: &Value) -> ReactionAction {
    let removed = value
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m.to_ascii_lowercase().contains("removed"));
    if removed { ReactionAction::Removed } else { ReactionAction::Added }
}

fn parse_login(value: &Value) -> Result<Credential, ApiError> {
    let token = value
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingField("access_token"))?;
    let user = value.get("user");
    let user_id = user.and_then(|u| u.get("id")).and_then(crate::model::id_from_value);
    let username = user
        .and_then(|u| u.get("name").or_else(|| u.get("username")).or_else(|| u.get("email")))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    Ok(Credential { token: token.to_owned(), user_id, username })
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
