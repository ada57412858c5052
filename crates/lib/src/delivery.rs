//! Delivery: resolve a sender to its thread (creating one on first contact) and post the text.
//!
//! Thread creation is single-flight per sender: concurrent first contacts wait on one
//! creation lock and re-check the cache, so the chat service sees one createForumTopic.

use crate::channels::{self, ChatApi, ChatApiError};
use crate::routing::ThreadCache;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("create topic failed: {0}")]
    CreateThread(#[source] ChatApiError),
    #[error("send message failed: {0}")]
    Send(#[source] ChatApiError),
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub thread_id: i64,
    /// True when this call created the thread.
    pub created_thread: bool,
}

/// Single delivery interface consumed by the HTTP and WebSocket transports.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, sender: &str, text: &str) -> Result<Delivered, DeliveryError>;
}

/// Routes each sender into its own thread of one destination group.
pub struct ChatGateway {
    api: Arc<dyn ChatApi>,
    cache: Arc<ThreadCache>,
    group_id: i64,
    creating: DashMap<String, Arc<Mutex<()>>>,
}

impl ChatGateway {
    pub fn new(api: Arc<dyn ChatApi>, cache: Arc<ThreadCache>, group_id: i64) -> Self {
        Self {
            api,
            cache,
            group_id,
            creating: DashMap::new(),
        }
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn cache(&self) -> &Arc<ThreadCache> {
        &self.cache
    }

    /// Thread for `sender`, creating and recording one on a cache miss.
    /// Returns (thread_id, created_by_this_call).
    pub async fn resolve_thread(&self, sender: &str) -> Result<(i64, bool), DeliveryError> {
        if let Some(id) = self.cache.lookup(self.group_id, sender).await {
            return Ok((id, false));
        }

        let slot = CreationSlot::acquire(&self.creating, sender);
        let _guard = slot.lock.lock().await;
        self.create_if_absent(sender).await
    }

    async fn create_if_absent(&self, sender: &str) -> Result<(i64, bool), DeliveryError> {
        if let Some(id) = self.cache.lookup(self.group_id, sender).await {
            return Ok((id, false));
        }
        let thread_id = self
            .api
            .create_thread(self.group_id, &channels::thread_name(sender))
            .await
            .map_err(DeliveryError::CreateThread)?;
        log::info!(
            "created thread {} for sender {} in group {}",
            thread_id,
            sender,
            self.group_id
        );
        if let Err(e) = self.cache.assign(self.group_id, sender, thread_id).await {
            log::warn!("saving thread cache failed: {}", e);
        }
        Ok((thread_id, true))
    }
}

/// A waiter's share of a sender's creation lock. The map entry goes away with the last
/// share, including when the waiting future is cancelled.
struct CreationSlot<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    sender: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> CreationSlot<'a> {
    fn acquire(map: &'a DashMap<String, Arc<Mutex<()>>>, sender: &'a str) -> Self {
        let lock = map.entry(sender.to_string()).or_default().clone();
        Self { map, sender, lock }
    }
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        // Two owners left: the map and this slot.
        self.map.remove_if(self.sender, |_, l| {
            Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2
        });
    }
}

#[async_trait]
impl Deliver for ChatGateway {
    async fn deliver(&self, sender: &str, text: &str) -> Result<Delivered, DeliveryError> {
        let (thread_id, created_thread) = self.resolve_thread(sender).await?;
        self.api
            .send_text(self.group_id, thread_id, text)
            .await
            .map_err(DeliveryError::Send)?;
        log::debug!("delivered message from {} to thread {}", sender, thread_id);
        Ok(Delivered {
            thread_id,
            created_thread,
        })
    }
}
