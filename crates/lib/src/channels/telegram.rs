//! Telegram Bot API client: forum topics as threads, sendMessage into a topic,
//! and getUpdates long-poll for replies posted in the group.

use crate::channels::{ChatApi, ChatApiError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const LONG_POLL_TIMEOUT: u64 = 30;

/// Bot API envelope: `{ "ok": bool, "result": T, "description": "..." }`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForumTopic {
    message_thread_id: i64,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

fn request_error(e: reqwest::Error) -> ChatApiError {
    ChatApiError::Request(e.without_url())
}

/// Client for the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramClient {
    api_base: String,
    token: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ChatApiError> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let status = res.status();
        let text = res.text().await.map_err(request_error)?;
        let data: ApiResponse<T> = serde_json::from_str(&text).map_err(|_| {
            ChatApiError::Api(format!("{} failed: {} {}", method, status, text))
        })?;
        if !data.ok {
            return Err(ChatApiError::Api(format!(
                "{} failed: {}",
                method,
                data.description.unwrap_or_else(|| status.to_string())
            )));
        }
        data.result
            .ok_or_else(|| ChatApiError::Api(format!("{} returned no result", method)))
    }

    /// getMe: validates the token. Returns the bot user.
    pub async fn get_me(&self) -> Result<TelegramUser, ChatApiError> {
        self.call("getMe", serde_json::json!({})).await
    }

    /// createForumTopic in `chat_id`; returns the new topic's message_thread_id.
    pub async fn create_forum_topic(&self, chat_id: i64, name: &str) -> Result<i64, ChatApiError> {
        let topic: ForumTopic = self
            .call(
                "createForumTopic",
                serde_json::json!({ "chat_id": chat_id, "name": name }),
            )
            .await?;
        Ok(topic.message_thread_id)
    }

    /// sendMessage into a forum topic.
    pub async fn send_message(&self, chat_id: i64, thread_id: i64, text: &str) -> Result<(), ChatApiError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "message_thread_id": thread_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    /// getUpdates long poll. Returns (updates, next_offset).
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChatApiError> {
        let mut body = serde_json::json!({
            "timeout": LONG_POLL_TIMEOUT,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            body["offset"] = serde_json::Value::from(off);
        }
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", body).await?;
        let next_offset = updates
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1)
            .or(offset);
        Ok((updates, next_offset))
    }
}

#[async_trait]
impl ChatApi for TelegramClient {
    async fn create_thread(&self, group_id: i64, name: &str) -> Result<i64, ChatApiError> {
        self.create_forum_topic(group_id, name).await
    }

    async fn send_text(&self, group_id: i64, thread_id: i64, text: &str) -> Result<(), ChatApiError> {
        self.send_message(group_id, thread_id, text).await
    }
}
