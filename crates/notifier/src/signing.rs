//! HMAC-SHA256 request signing.
//!
//! The signature is computed over the exact request body bytes, keyed with
//! the notification's secret, and sent as
//! `X-Webhook-Signature: sha256=<lowercase hex digest>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header carrying the notification id, attached to every attempt.
pub const NOTIFICATION_ID_HEADER: &str = "X-Notification-Id";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Lowercase hex HMAC-SHA256 of `body` keyed with `secret`.
///
/// Returns `None` only if the MAC rejects the key, which HMAC never does.
pub fn compute_signature(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Full `X-Webhook-Signature` header value, `sha256=<hex>`.
pub fn signature_header_value(secret: &str, body: &[u8]) -> Option<String> {
    compute_signature(secret, body).map(|hex| format!("{SIGNATURE_PREFIX}{hex}"))
}

/// Verify a received `X-Webhook-Signature` header against `body`.
///
/// Comparison is constant-time. Accepts upper- or lowercase hex.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}
