//! Connection registry: sender identity -> live WebSocket connection, for server pushes.
//!
//! Owned by one WebSocket transport instance. Each connection has a writer task fed by an
//! unbounded channel; a closed channel means the socket write side is gone.

use crate::gateway::protocol::PushFrame;
use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PushError {
    #[error("no live connection for {0}")]
    NotConnected(String),
    #[error("connection for {0} is closed")]
    Closed(String),
}

/// Write side of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Queue a frame for the writer task. Err when the writer is gone.
    pub fn send(&self, msg: Message) -> Result<(), Message> {
        self.tx.send(msg).map_err(|e| e.0)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `identity`, replacing any previous connection for it.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) {
        if let Some(old) = self.inner.insert(identity.to_string(), handle) {
            log::debug!("replaced connection {} for {}", old.id, identity);
        }
    }

    /// Remove `identity` only if it still points at connection `id`.
    pub fn unregister(&self, identity: &str, id: Uuid) {
        self.inner.remove_if(identity, |_, h| h.id == id);
    }

    pub fn get(&self, identity: &str) -> Option<ConnectionHandle> {
        self.inner.get(identity).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Push `text` to the connection registered for `target`. A failed write deregisters it.
    pub fn push_message(&self, target: &str, text: &str) -> Result<(), PushError> {
        let handle = self
            .get(target)
            .ok_or_else(|| PushError::NotConnected(target.to_string()))?;
        let frame = serde_json::to_string(&PushFrame::new(target, text)).unwrap_or_default();
        if handle.send(Message::Text(frame)).is_err() {
            log::warn!("push to {} failed, removing connection {}", target, handle.id);
            self.unregister(target, handle.id);
            return Err(PushError::Closed(target.to_string()));
        }
        Ok(())
    }

    /// Send a close frame to every connection and clear the registry.
    pub fn close_all(&self) {
        for entry in self.inner.iter() {
            let _ = entry.value().send(Message::Close(None));
        }
        self.inner.clear();
    }
}
