//! Wire types shared by the HTTP and WebSocket transports.

use serde::{Deserialize, Serialize};

/// WebSocket action carrying an inbound message.
pub const ACTION_SEND_MESSAGE: &str = "send_message";
/// WebSocket action for server-initiated pushes.
pub const ACTION_PUSH_MESSAGE: &str = "push_message";

/// Response codes carried in the body. HTTP status is always 200.
pub mod code {
    pub const OK: i32 = 0;
    pub const BAD_REQUEST: i32 = 400;
    pub const UNAUTHORIZED: i32 = 401;
    pub const METHOD_NOT_ALLOWED: i32 = 405;
    pub const INTERNAL_ERROR: i32 = 500;
}

/// One inbound message: `{ sender, text, timestamp, signature }` (`sign` accepted too).
/// Missing fields are empty strings; an empty signature simply fails verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: String,
    #[serde(alias = "sign")]
    pub signature: String,
}

/// Body of every reply: `{ code, message, data? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl GatewayResponse {
    pub fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            code: code::OK,
            message: message.into(),
            data,
        }
    }

    pub fn err(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }
}

/// Client frame: `{ "action": "send_message", "payload": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrame {
    pub action: String,
    #[serde(default)]
    pub payload: InboundMessage,
}

/// Server push: `{ "action": "push_message", "payload": { "target", "text" } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    pub action: String,
    pub payload: PushPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub target: String,
    pub text: String,
}

impl PushFrame {
    pub fn new(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            action: ACTION_PUSH_MESSAGE.to_string(),
            payload: PushPayload {
                target: target.into(),
                text: text.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_accepts_legacy_sign_field() {
        let m: InboundMessage = serde_json::from_str(
            r#"{"sender":"alice","text":"hi","timestamp":"1","sign":"abc"}"#,
        )
        .unwrap();
        assert_eq!(m.signature, "abc");
    }

    #[test]
    fn response_omits_empty_data() {
        let s = serde_json::to_string(&GatewayResponse::err(code::UNAUTHORIZED, "nope")).unwrap();
        assert_eq!(s, r#"{"code":401,"message":"nope"}"#);
    }

    #[test]
    fn push_frame_shape() {
        let v = serde_json::to_value(PushFrame::new("alice", "reply")).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"action":"push_message","payload":{"target":"alice","text":"reply"}})
        );
    }
}
