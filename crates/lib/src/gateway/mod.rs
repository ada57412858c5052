//! Gateway: HTTP + WebSocket front doors into the delivery layer.
//!
//! `POST /message` and `GET /ws` share one verification/delivery pipeline. They can run on
//! separate ports or share one, in which case the listener sniffs for WebSocket upgrades.

mod http;
mod inbound;
mod mux;
mod protocol;
mod registry;
mod relay;
mod server;
mod tls;
mod ws;

pub use http::router as http_router;
pub use inbound::InboundPipeline;
pub use mux::{is_websocket_upgrade, serve, Routes};
pub use protocol::{
    code, GatewayResponse, InboundMessage, PushFrame, PushPayload, WsFrame, ACTION_PUSH_MESSAGE,
    ACTION_SEND_MESSAGE,
};
pub use registry::{ConnectionHandle, ConnectionRegistry, PushError};
pub use relay::{relay_update, run_reply_relay};
pub use server::{bind_listener, run_gateway, run_gateway_until};
pub use tls::build_tls_acceptor;
pub use ws::{Liveness, WsTransport};
