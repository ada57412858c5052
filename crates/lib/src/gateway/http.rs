//! Request/response transport: `POST /message`.
//!
//! Errors travel in the body code; the status line is always 200.

use crate::gateway::inbound::InboundPipeline;
use crate::gateway::protocol::{code, GatewayResponse, InboundMessage};
use axum::{
    body::Body,
    extract::State,
    http::Method,
    routing::{any, get},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::json;

/// Largest accepted `POST /message` body.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Router for the HTTP transport.
pub fn router(pipeline: InboundPipeline) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/message", any(handle_message))
        .with_state(pipeline)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "runtime": "running", "transport": "http" }))
}

async fn handle_message(
    State(pipeline): State<InboundPipeline>,
    method: Method,
    body: Body,
) -> Json<GatewayResponse> {
    if method != Method::POST {
        return Json(GatewayResponse::err(
            code::METHOD_NOT_ALLOWED,
            "only POST is supported",
        ));
    }
    let body = match read_limited(body, MAX_BODY_BYTES).await {
        Ok(Some(b)) => b,
        Ok(None) => {
            return Json(GatewayResponse::err(code::BAD_REQUEST, "request body too large"));
        }
        Err(e) => {
            log::debug!("unreadable message body: {}", e);
            return Json(GatewayResponse::err(code::BAD_REQUEST, "malformed request body"));
        }
    };
    let msg: InboundMessage = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => {
            log::debug!("malformed message body: {}", e);
            return Json(GatewayResponse::err(code::BAD_REQUEST, "malformed request body"));
        }
    };
    Json(pipeline.process(&msg).await)
}

/// Collect up to `limit` bytes; `None` if the body is longer. The rest is drained so the
/// connection can carry the reply.
async fn read_limited(body: Body, limit: usize) -> Result<Option<Vec<u8>>, axum::Error> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    let mut over = false;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if over || buf.len() + chunk.len() > limit {
            over = true;
            continue;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(if over { None } else { Some(buf) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_limited_stops_at_the_limit() {
        let ok = read_limited(Body::from(vec![b'a'; 16]), 16).await.unwrap();
        assert_eq!(ok.map(|b| b.len()), Some(16));

        let over = read_limited(Body::from(vec![b'a'; 17]), 16).await.unwrap();
        assert!(over.is_none());
    }
}
