//! Telegram channel — receives updates by long-polling or webhook.
//!
//! Native Rust Telegram Bot API client adapted to the `Channel` trait.
//! In polling mode a background task calls `getUpdates`; in webhook mode
//! Telegram POSTs updates to `/{bot_token}` on the router returned by
//! [`TelegramChannel::router`]. Both feed the same message stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::channels::{
    Channel, IncomingMessage, Keyboard, MessageStream, OutgoingResponse, StatusUpdate,
};
use crate::config::TelegramMode;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Header carrying the `secret_token` registered with `setWebhook`.
const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// State shared between the channel, the poller and the webhook handler.
struct TelegramInner {
    bot_token: SecretString,
    /// Sent by Telegram on every webhook delivery; regenerated per process.
    webhook_secret: SecretString,
    allowed_users: Vec<String>,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
}

impl TelegramInner {
    /// Convert an update and push it into the message stream.
    /// Returns `false` once the stream has been dropped.
    fn dispatch(&self, update: &serde_json::Value) -> bool {
        match parse_update(update, &self.allowed_users) {
            Some(incoming) => self.incoming_tx.send(incoming).is_ok(),
            None => true,
        }
    }
}

/// Telegram channel — connects to the Bot API.
pub struct TelegramChannel {
    inner: Arc<TelegramInner>,
    mode: TelegramMode,
    client: reqwest::Client,
    /// Receiver side of the incoming channel, consumed once in `start()`.
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>, mode: TelegramMode) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(TelegramInner {
                bot_token,
                webhook_secret: SecretString::from(Uuid::new_v4().simple().to_string()),
                allowed_users,
                incoming_tx,
            }),
            mode,
            client: reqwest::Client::new(),
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.inner.bot_token, method)
    }

    /// Full URL Telegram should deliver updates to in webhook mode.
    pub fn webhook_url(&self) -> Option<String> {
        match &self.mode {
            TelegramMode::Webhook { base_url } => Some(format!(
                "{base_url}/{}",
                self.inner.bot_token.expose_secret()
            )),
            TelegramMode::Polling => None,
        }
    }

    /// Build an Axum router with the webhook endpoint.
    ///
    /// The path segment must equal the bot token and the request must carry
    /// the webhook secret header; anything else is rejected.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/{token}", post(webhook_handler))
            .with_state(Arc::clone(&self.inner))
    }

    /// Send a text message, splitting at Telegram's 4096 char limit.
    /// The keyboard is attached to the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last { keyboard } else { None };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = reply_markup(keyboard);
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }

    /// Register the webhook URL with Telegram.
    async fn set_webhook(&self, url: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "url": url,
            "secret_token": self.inner.webhook_secret.expose_secret(),
            "allowed_updates": ["message"],
        });
        self.call("setWebhook", body).await
    }

    /// Remove any registered webhook; `getUpdates` refuses to work while one is set.
    async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call("deleteWebhook", serde_json::json!({})).await
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("{method}: {e}"),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("{method} returned {}", resp.status()),
            })
        }
    }

    fn spawn_poller(&self) {
        let inner = Arc::clone(&self.inner);
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let url = api_url(&inner.bot_token, "getUpdates");

            tracing::info!("Telegram channel polling for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    tracing::warn!(response = %data, "Telegram getUpdates returned no result");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }
                    if !inner.dispatch(update) {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });
    }
}

// ── Webhook ─────────────────────────────────────────────────────────

async fn webhook_handler(
    State(inner): State<Arc<TelegramInner>>,
    Path(path_token): Path<String>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Value>,
) -> StatusCode {
    if !secrets_match(&path_token, inner.bot_token.expose_secret()) {
        return StatusCode::NOT_FOUND;
    }
    let header = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(header, inner.webhook_secret.expose_secret()) {
        tracing::warn!("Telegram webhook request with missing or wrong secret token");
        return StatusCode::UNAUTHORIZED;
    }
    if !inner.dispatch(&update) {
        tracing::warn!("Telegram webhook update received after shutdown");
    }
    // Always acknowledge so Telegram does not redeliver.
    StatusCode::OK
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let rx = self
            .incoming_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: "channel already started".into(),
            })?;

        match self.webhook_url() {
            Some(url) => {
                self.set_webhook(&url).await?;
                tracing::info!("Telegram webhook registered");
            }
            None => {
                if let Err(e) = self.delete_webhook().await {
                    tracing::warn!("Telegram deleteWebhook failed: {e}");
                }
                self.spawn_poller();
            }
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id in message metadata".into(),
            })?;

        self.send_message(chat_id, &response.content, response.keyboard.as_ref())
            .await
    }

    async fn send_status(
        &self,
        status: StatusUpdate,
        metadata: &serde_json::Value,
    ) -> Result<(), ChannelError> {
        if let Some(chat_id) = metadata.get("chat_id").and_then(|v| v.as_str()) {
            match status {
                StatusUpdate::Typing => {
                    let _ = self
                        .client
                        .post(self.api_url("sendChatAction"))
                        .json(&serde_json::json!({
                            "chat_id": chat_id,
                            "action": "typing"
                        }))
                        .send()
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Compare secrets without leaking where they differ.
fn secrets_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn api_url(token: &SecretString, method: &str) -> String {
    format!("https://api.telegram.org/bot{}/{method}", token.expose_secret())
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Turn a Telegram `Update` into an `IncomingMessage`.
///
/// Returns `None` for non-text updates and for senders outside the allowlist.
fn parse_update(update: &serde_json::Value, allowed_users: &[String]) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(|u| u.as_str())
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string());

    // Check allowlist against both username and numeric ID
    let mut identities = vec![username];
    if let Some(ref id) = user_id {
        identities.push(id.as_str());
    }
    if !check_user_allowed(allowed_users, identities) {
        tracing::warn!(
            "Telegram: ignoring message from unauthorized user: \
             username={username}, user_id={}",
            user_id.as_deref().unwrap_or("unknown")
        );
        return None;
    }

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string())?;

    let first_name = from
        .and_then(|f| f.get("first_name"))
        .and_then(|n| n.as_str());

    let incoming = IncomingMessage::new("telegram", user_id.as_deref().unwrap_or(username), text)
        .with_metadata(serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }))
        .with_user_name(first_name.unwrap_or(username));

    Some(incoming)
}

/// Telegram `reply_markup` for a keyboard.
fn reply_markup(keyboard: &Keyboard) -> serde_json::Value {
    match keyboard {
        Keyboard::Choices { rows } => {
            let rows: Vec<Vec<serde_json::Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|label| serde_json::json!({ "text": label }))
                        .collect()
                })
                .collect();
            serde_json::json!({
                "keyboard": rows,
                "one_time_keyboard": true,
                "resize_keyboard": true,
            })
        }
        Keyboard::Remove => serde_json::json!({ "remove_keyboard": true }),
    }
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..cut];
        let split_at = chunk.rfind('\n').or_else(|| chunk.rfind(' ')).unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
