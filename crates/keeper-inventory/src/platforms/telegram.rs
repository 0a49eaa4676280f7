//! Telegram transport
//!
//! Long-polls the Bot API with `getUpdates`, turns messages and button
//! presses into [`InboundEvent`]s and sends each [`Reply`] back with an
//! inline keyboard.

use crate::audit::Actor;
use crate::bot::{ConversationController, InboundEvent, Reply};
use crate::error::{InventoryError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

/// Longest message text `sendMessage` accepts, in characters
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram bot configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token from BotFather
    pub token: String,
    pub api_base: String,
    /// Long-poll timeout handed to `getUpdates`
    pub poll_timeout: Duration,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_TELEGRAM_API.to_string(),
            poll_timeout: Duration::from_secs(30),
        }
    }

    /// Read `TELEGRAM_BOT_TOKEN` and the optional `TELEGRAM_POLL_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| InventoryError::Config("TELEGRAM_BOT_TOKEN not set".to_string()))?;

        let mut config = Self::new(token);
        if let Ok(base) = std::env::var("TELEGRAM_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(secs) = std::env::var("TELEGRAM_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.poll_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl User {
    fn actor(&self) -> Actor {
        let name = self.username.clone().or_else(|| self.first_name.clone());
        Actor::new(self.id.to_string(), name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// An update the controller can handle, with where to answer it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub chat_id: i64,
    pub event: InboundEvent,
    /// Set for button presses, which must be acknowledged
    pub callback_id: Option<String>,
}

impl Update {
    /// Text messages and button presses; everything else is ignored
    pub fn route(&self) -> Option<Routed> {
        if let Some(query) = &self.callback_query {
            let message = query.message.as_ref()?;
            let token = query.data.clone()?;
            return Some(Routed {
                chat_id: message.chat.id,
                event: InboundEvent::button(query.from.actor(), token),
                callback_id: Some(query.id.clone()),
            });
        }

        let message = self.message.as_ref()?;
        let text = message.text.clone()?;
        let sender = message.from.as_ref()?;
        Some(Routed {
            chat_id: message.chat.id,
            event: InboundEvent::text(sender.actor(), text),
            callback_id: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

/// Cut `text` to what one message can carry
fn clip_text(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

/// `sendMessage` body for a reply
pub fn send_message_body(chat_id: i64, reply: &Reply) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": clip_text(&reply.text),
    });

    let rows = reply.buttons();
    if !rows.is_empty() {
        let keyboard: Vec<Vec<InlineButton<'_>>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineButton {
                        text: &b.label,
                        callback_data: &b.token,
                    })
                    .collect()
            })
            .collect();
        body["reply_markup"] = json!({ "inline_keyboard": keyboard });
    }
    body
}

/// Telegram bot driving a [`ConversationController`]
pub struct TelegramBot {
    config: TelegramConfig,
    client: reqwest::Client,
    controller: ConversationController,
}

impl TelegramBot {
    pub fn new(config: TelegramConfig, controller: ConversationController) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.poll_timeout + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            client,
            controller,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let response: ApiResponse<T> = self
            .client
            .post(self.config.method_url(method))
            .json(body)
            .send()
            .await?
            .json()
            .await?;

        match response {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(InventoryError::RemoteStore(format!(
                "{method} failed: {}",
                description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": self.config.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body).await
    }

    pub async fn send_message(&self, chat_id: i64, reply: &Reply) -> Result<()> {
        let _: Value = self
            .call("sendMessage", &send_message_body(chat_id, reply))
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }

    async fn dispatch(&self, routed: Routed) {
        if let Some(id) = &routed.callback_id {
            if let Err(e) = self.answer_callback_query(id).await {
                debug!(error = %e, "Could not acknowledge button press");
            }
        }

        let reply = self.controller.handle(routed.event).await;
        let Err(e) = self.send_message(routed.chat_id, &reply).await else {
            return;
        };
        if reply.keyboard.is_none() {
            error!(chat_id = routed.chat_id, error = %e, "Failed to send reply");
            return;
        }
        warn!(chat_id = routed.chat_id, error = %e, "Reply rejected, sending it without buttons");

        let plain = Reply::text(&reply.text);
        if let Err(e) = self.send_message(routed.chat_id, &plain).await {
            error!(chat_id = routed.chat_id, error = %e, "Failed to send reply");
        }
    }

    /// Poll until the process is stopped. Updates are handled one at a
    /// time, in the order Telegram delivers them.
    pub async fn run(&self) -> Result<()> {
        let me: User = self.call("getMe", &json!({})).await?;
        info!(bot_id = me.id, username = ?me.username, "Telegram bot authenticated");

        let mut offset = 0;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                match update.route() {
                    Some(routed) => self.dispatch(routed).await,
                    None => debug!(update_id = update.update_id, "Skipping update"),
                }
            }
        }
    }
}
