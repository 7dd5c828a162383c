//! Webhook signature verification.
//!
//! Callers sign the exact raw request body with HMAC-SHA256 keyed by the
//! shared secret and send the hex digest in the `X-Signature` header.
//! Verification runs before the body is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Compute the lowercase hex HMAC-SHA256 of `raw_body` keyed by `secret`.
pub fn compute_signature(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature against the raw request body.
///
/// # Arguments
///
/// * `secret` - The shared webhook secret
/// * `raw_body` - The request body exactly as received
/// * `signature` - The `X-Signature` header value (hex, either case)
///
/// # Returns
///
/// `true` only if the signature is the exact HMAC of the body. The digest
/// comparison is constant-time.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();

    if secret.is_empty() || signature.is_empty() {
        debug!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing"
        );
        return false;
    }

    let provided = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!(signature_length = signature.len(), "webhook_signature_not_hex");
            return false;
        }
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            debug!("webhook_signature_invalid_key");
            return false;
        }
    };
    mac.update(raw_body);

    let valid = mac.verify_slice(&provided).is_ok();

    if !valid {
        debug!(body_length = raw_body.len(), "webhook_signature_mismatch");
    }

    valid
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "testsecret";
    const BODY: &[u8] = br#"{"message_id":"m1","from_msisdn":"+1555","ts":"2024-01-01T00:00:00Z","text":"hi"}"#;

    #[test]
    fn test_verify_signature_valid() {
        let signature = compute_signature(SECRET, BODY);
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(SECRET, BODY, &signature));
    }

    #[test]
    fn test_verify_signature_accepts_uppercase_and_whitespace() {
        let signature = compute_signature(SECRET, BODY).to_uppercase();
        assert!(verify_signature(SECRET, BODY, &format!(" {} ", signature)));
    }

    #[test]
    fn test_verify_signature_different_body() {
        let signature = compute_signature(SECRET, b"other bytes");
        assert!(!verify_signature(SECRET, BODY, &signature));
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let signature = compute_signature("not-the-secret", BODY);
        assert!(!verify_signature(SECRET, BODY, &signature));
    }

    #[test]
    fn test_verify_signature_near_match() {
        let mut signature = compute_signature(SECRET, BODY);
        let last = if signature.ends_with('0') { "1" } else { "0" };
        signature.replace_range(63.., last);
        assert!(!verify_signature(SECRET, BODY, &signature));

        let truncated = &compute_signature(SECRET, BODY)[..62];
        assert!(!verify_signature(SECRET, BODY, truncated));
    }

    #[test]
    fn test_verify_signature_missing_or_garbage() {
        assert!(!verify_signature(SECRET, BODY, ""));
        assert!(!verify_signature(SECRET, BODY, "   "));
        assert!(!verify_signature(SECRET, BODY, "not-hex-at-all"));
        assert!(!verify_signature("", BODY, &compute_signature("", BODY)));
    }

    #[test]
    fn test_compute_signature_known_vector() {
        // RFC 4231 test case 2.
        assert_eq!(
            compute_signature("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
