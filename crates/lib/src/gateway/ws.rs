//! Persistent transport: `GET /ws`.
//!
//! Frames are `{ action, payload }`; only `send_message` is handled. The server pings on a
//! fixed interval and drops the connection when no pong arrives before the idle deadline.
//! After a successful delivery the connection is registered under the sender for pushes.

use crate::config::WsConfig;
use crate::gateway::inbound::InboundPipeline;
use crate::gateway::protocol::{code, GatewayResponse, WsFrame, ACTION_SEND_MESSAGE};
use crate::gateway::registry::{ConnectionHandle, ConnectionRegistry, PushError};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Ping cadence and idle deadline for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl Liveness {
    pub fn from_config(ws: &WsConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(ws.ping_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(ws.idle_timeout_secs.max(1)),
        }
    }
}

/// WebSocket transport instance; owns its connection registry.
#[derive(Clone)]
pub struct WsTransport {
    pipeline: InboundPipeline,
    registry: Arc<ConnectionRegistry>,
    liveness: Liveness,
}

impl WsTransport {
    pub fn new(pipeline: InboundPipeline, liveness: Liveness) -> Self {
        Self {
            pipeline,
            registry: Arc::new(ConnectionRegistry::new()),
            liveness,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Push `text` to the connection registered for `target`.
    pub fn push_message(&self, target: &str, text: &str) -> Result<(), PushError> {
        self.registry.push_message(target, text)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(health))
            .route("/ws", get(ws_handler))
            .with_state(self.clone())
    }

    async fn handle_socket(self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let handle = ConnectionHandle::new(tx);
        let conn_id = handle.id;
        log::debug!("ws connection {} opened", conn_id);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    log::debug!("ws connection {} write failed: {}", conn_id, e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let idle = self.liveness.idle_timeout;
        let mut ping = tokio::time::interval_at(
            Instant::now() + self.liveness.ping_interval,
            self.liveness.ping_interval,
        );
        let deadline = tokio::time::sleep(idle);
        tokio::pin!(deadline);
        let mut registered: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                biased;

                msg = stream.next() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        Message::Pong(_) => deadline.as_mut().reset(Instant::now() + idle),
                        Message::Text(text) => {
                            self.handle_frame(&text, &handle, &mut registered).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                _ = ping.tick() => {
                    if handle.send(Message::Ping(Vec::new())).is_err() {
                        break;
                    }
                }
                _ = &mut deadline => {
                    log::info!("ws connection {} missed liveness deadline, closing", conn_id);
                    let _ = handle.send(Message::Close(None));
                    break;
                }
            }
        }

        for sender in &registered {
            self.registry.unregister(sender, conn_id);
        }
        log::debug!("ws connection {} closed", conn_id);
    }

    async fn handle_frame(
        &self,
        text: &str,
        handle: &ConnectionHandle,
        registered: &mut HashSet<String>,
    ) {
        let frame: WsFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("ws connection {} sent malformed frame: {}", handle.id, e);
                reply(handle, &GatewayResponse::err(code::BAD_REQUEST, "malformed frame"));
                return;
            }
        };
        match frame.action.as_str() {
            ACTION_SEND_MESSAGE => {
                let res = self.pipeline.process(&frame.payload).await;
                if res.is_ok() {
                    let sender = frame.payload.sender;
                    self.registry.register(&sender, handle.clone());
                    registered.insert(sender);
                }
                reply(handle, &res);
            }
            other => log::info!("ignoring unknown ws action: {}", other),
        }
    }
}

fn reply(handle: &ConnectionHandle, res: &GatewayResponse) {
    if let Ok(text) = serde_json::to_string(res) {
        let _ = handle.send(Message::Text(text));
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "runtime": "running", "transport": "ws" }))
}

async fn ws_handler(State(transport): State<WsTransport>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| transport.handle_socket(socket))
}
