//! Destination chat service.
//!
//! `ChatApi` is the seam the delivery layer talks to; `TelegramClient` implements it
//! against the Bot API (forum topics as threads).

mod telegram;

use async_trait::async_trait;

pub use telegram::{TelegramClient, TelegramMessage, TelegramUpdate, TelegramUser};

/// Maximum thread (forum topic) name length accepted by the service.
pub const MAX_THREAD_NAME_CHARS: usize = 128;

/// Errors never carry the request URL: it embeds the bot token.
#[derive(Debug, thiserror::Error)]
pub enum ChatApiError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
}

/// Operations the bridge needs from the chat service.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Create a new thread named `name` in `group_id`; returns its id.
    async fn create_thread(&self, group_id: i64, name: &str) -> Result<i64, ChatApiError>;

    /// Post `text` into `thread_id` of `group_id`.
    async fn send_text(&self, group_id: i64, thread_id: i64, text: &str) -> Result<(), ChatApiError>;
}

/// Thread name for a sender, cut to the service limit on a char boundary.
pub fn thread_name(sender: &str) -> String {
    sender.chars().take(MAX_THREAD_NAME_CHARS).collect()
}
