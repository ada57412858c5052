//! Reply relay: messages posted by group members inside a sender's topic are pushed back
//! to that sender's live WebSocket connection. Uses the getUpdates long poll, so the bot
//! must not have a webhook set.

use crate::channels::{TelegramClient, TelegramUpdate};
use crate::gateway::registry::ConnectionRegistry;
use crate::routing::ThreadCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Long-poll until `shutdown` flips.
pub async fn run_reply_relay(
    client: TelegramClient,
    cache: Arc<ThreadCache>,
    group_id: i64,
    registry: Arc<ConnectionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("reply relay: starting getUpdates long-poll loop");
    let mut offset: Option<i64> = None;
    loop {
        let polled = tokio::select! {
            r = client.get_updates(offset) => r,
            _ = shutdown.changed() => break,
        };
        match polled {
            Ok((updates, next)) => {
                offset = next;
                for u in &updates {
                    relay_update(u, &cache, group_id, &registry).await;
                }
            }
            Err(e) => {
                log::debug!("reply relay getUpdates error: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    log::info!("reply relay stopped");
}

/// Push one update to its sender when it is a human reply inside a known thread.
/// Returns the sender it was pushed to.
pub async fn relay_update(
    update: &TelegramUpdate,
    cache: &ThreadCache,
    group_id: i64,
    registry: &ConnectionRegistry,
) -> Option<String> {
    let msg = update.message.as_ref()?;
    if msg.chat.id != group_id || msg.from.as_ref().is_some_and(|u| u.is_bot) {
        return None;
    }
    let thread_id = msg.message_thread_id?;
    let text = msg.text.as_deref()?;
    let sender = cache.sender_for_thread(group_id, thread_id).await?;
    match registry.push_message(&sender, text) {
        Ok(()) => Some(sender),
        Err(e) => {
            log::debug!("reply relay: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::ConnectionHandle;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    const GROUP: i64 = -100;

    fn update(json: serde_json::Value) -> TelegramUpdate {
        serde_json::from_value(json).unwrap()
    }

    async fn cache_with_alice() -> ThreadCache {
        let dir = std::env::temp_dir().join(format!("bridge-relay-test-{}", uuid::Uuid::new_v4()));
        let cache = ThreadCache::in_dir(dir).await.unwrap();
        cache.assign(GROUP, "alice", 7).await.unwrap();
        cache
    }

    #[tokio::test]
    async fn human_reply_in_known_thread_is_pushed() {
        let cache = cache_with_alice().await;
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("alice", ConnectionHandle::new(tx));

        let u = update(serde_json::json!({
            "update_id": 1,
            "message": {"chat": {"id": GROUP}, "message_thread_id": 7,
                        "from": {"id": 5, "is_bot": false}, "text": "we got it"}
        }));
        assert_eq!(relay_update(&u, &cache, GROUP, &registry).await.as_deref(), Some("alice"));
        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected a push frame");
        };
        assert!(text.contains("we got it"));
    }

    #[tokio::test]
    async fn bot_other_group_and_unknown_thread_are_skipped() {
        let cache = cache_with_alice().await;
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("alice", ConnectionHandle::new(tx));

        let from_bot = update(serde_json::json!({
            "update_id": 1,
            "message": {"chat": {"id": GROUP}, "message_thread_id": 7,
                        "from": {"id": 5, "is_bot": true}, "text": "echo"}
        }));
        let other_group = update(serde_json::json!({
            "update_id": 2,
            "message": {"chat": {"id": -999}, "message_thread_id": 7, "text": "hi"}
        }));
        let unknown_thread = update(serde_json::json!({
            "update_id": 3,
            "message": {"chat": {"id": GROUP}, "message_thread_id": 8, "text": "hi"}
        }));
        for u in [from_bot, other_group, unknown_thread] {
            assert!(relay_update(&u, &cache, GROUP, &registry).await.is_none());
        }
        assert!(rx.try_recv().is_err());
    }
}
