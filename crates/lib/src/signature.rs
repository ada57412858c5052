//! Request signatures: HMAC-SHA256 over `timestamp + "\n" + secret`, keyed by the secret,
//! base64-encoded and then URL-query-escaped on the wire.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

fn digest(timestamp: &str, secret: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b"\n");
    mac.update(secret.as_bytes());
    Some(mac)
}

/// Undo query escaping the way form decoding does: `+` is a space, `%XX` is a byte.
fn query_unescape(s: &str) -> Option<String> {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded).ok().map(|c| c.into_owned())
}

/// Check a caller-supplied token against the expected signature for `timestamp`.
/// Malformed tokens are a mismatch, never an error.
pub fn verify(timestamp: &str, signed_token: &str, secret: &str) -> bool {
    let Some(decoded) = query_unescape(signed_token) else {
        return false;
    };
    let Ok(sig_bytes) = base64::engine::general_purpose::STANDARD.decode(decoded.as_bytes())
    else {
        return false;
    };
    match digest(timestamp, secret) {
        Some(mac) => mac.verify_slice(&sig_bytes).is_ok(),
        None => false,
    }
}

/// Produce the wire token for `timestamp` (client side; used by the CLI and tests).
pub fn sign(timestamp: &str, secret: &str) -> String {
    let bytes = digest(timestamp, secret)
        .map(|mac| mac.finalize().into_bytes().to_vec())
        .unwrap_or_default();
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    urlencoding::encode(&b64).into_owned()
}

/// Current Unix time in milliseconds, the timestamp format clients sign.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-transport verifier: shared secret plus an optional freshness window.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: String,
    max_skew: Option<Duration>,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, max_skew: Option<Duration>) -> Self {
        Self {
            secret: secret.into(),
            max_skew,
        }
    }

    pub fn verify(&self, timestamp: &str, signed_token: &str) -> bool {
        if let Some(max_skew) = self.max_skew {
            if !is_fresh(timestamp, max_skew, now_millis()) {
                log::debug!("signature timestamp outside freshness window: {}", timestamp);
                return false;
            }
        }
        verify(timestamp, signed_token, &self.secret)
    }
}

fn is_fresh(timestamp: &str, max_skew: Duration, now_ms: i64) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let skew_ms = i64::try_from(max_skew.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(ts).saturating_abs() <= skew_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "SEC0123456789abcdef";
    const TS: &str = "1700000000000";

    #[test]
    fn signed_token_verifies() {
        let token = sign(TS, SECRET);
        assert!(verify(TS, &token, SECRET));
    }

    #[test]
    fn matches_reference_hmac() {
        // base64(HMAC-SHA256(key="key", "123\nkey")), computed independently.
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"123\nkey");
        let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        assert!(verify("123", &urlencoding::encode(&expected), "key"));
    }

    #[test]
    fn token_is_query_escaped() {
        let token = sign(TS, SECRET);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(!token.contains('='));
    }

    #[test]
    fn changed_timestamp_or_secret_fails() {
        let token = sign(TS, SECRET);
        assert!(!verify("1700000000001", &token, SECRET));
        assert!(!verify(TS, &token, "SEC0123456789abcdeF"));
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let token = sign(TS, SECRET);
        let b64 = urlencoding::decode(&token).unwrap().into_owned();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&b64).unwrap();
        raw[0] ^= 0x01;
        let tampered = urlencoding::encode(&base64::engine::general_purpose::STANDARD.encode(raw))
            .into_owned();
        assert!(!verify(TS, &tampered, SECRET));
    }

    #[test]
    fn malformed_token_is_false() {
        assert!(!verify(TS, "", SECRET));
        assert!(!verify(TS, "%zz", SECRET));
        assert!(!verify(TS, "not base64 at all!", SECRET));
    }

    #[test]
    fn unescaped_token_without_special_chars_verifies() {
        let token = sign(TS, SECRET);
        let raw = urlencoding::decode(&token).unwrap().into_owned();
        if !raw.contains('+') {
            assert!(verify(TS, &raw, SECRET));
        }
    }

    #[test]
    fn freshness_window() {
        let window = Duration::from_secs(300);
        let now = 1_700_000_000_000;
        assert!(is_fresh("1700000000000", window, now));
        assert!(is_fresh("1699999800000", window, now));
        assert!(is_fresh("1700000299999", window, now));
        assert!(!is_fresh("1699999000000", window, now));
        assert!(!is_fresh("not-a-number", window, now));
    }

    #[test]
    fn verifier_without_window_accepts_old_timestamps() {
        let verifier = SignatureVerifier::new(SECRET, None);
        assert!(verifier.verify("1", &sign("1", SECRET)));
    }

    #[test]
    fn verifier_with_window_rejects_stale_timestamps() {
        let verifier = SignatureVerifier::new(SECRET, Some(Duration::from_secs(60)));
        assert!(!verifier.verify("1", &sign("1", SECRET)));
        let now = now_millis().to_string();
        assert!(verifier.verify(&now, &sign(&now, SECRET)));
    }
}
