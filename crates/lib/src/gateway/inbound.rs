//! Verification and delivery shared by both transports; they differ only in framing.

use crate::delivery::Deliver;
use crate::gateway::protocol::{code, GatewayResponse, InboundMessage};
use crate::signature::SignatureVerifier;
use std::sync::Arc;

/// What a transport needs to turn an inbound message into a response.
#[derive(Clone)]
pub struct InboundPipeline {
    pub delivery: Arc<dyn Deliver>,
    pub verifier: Arc<SignatureVerifier>,
}

impl InboundPipeline {
    pub fn new(delivery: Arc<dyn Deliver>, verifier: SignatureVerifier) -> Self {
        Self {
            delivery,
            verifier: Arc::new(verifier),
        }
    }

    /// Verify the signature, then deliver. Never fails: errors become coded responses.
    pub async fn process(&self, msg: &InboundMessage) -> GatewayResponse {
        if !self.verifier.verify(&msg.timestamp, &msg.signature) {
            log::debug!("signature verification failed for sender {}", msg.sender);
            return GatewayResponse::err(code::UNAUTHORIZED, "signature verification failed");
        }
        match self.delivery.deliver(&msg.sender, &msg.text).await {
            Ok(d) => GatewayResponse::ok(
                "sent",
                Some(serde_json::json!({ "threadId": d.thread_id })),
            ),
            Err(e) => {
                log::warn!("delivery for sender {} failed: {}", msg.sender, e);
                GatewayResponse::err(code::INTERNAL_ERROR, format!("failed to send message: {}", e))
            }
        }
    }
}
