//! Webhook callback URLs and HMAC-SHA256 payload signatures.
//!
//! Two signing schemes are accepted. Replicate signs deliveries following
//! Standard Webhooks: `webhook-id`, `webhook-timestamp` and
//! `webhook-signature` headers, with a base64 HMAC over
//! `{id}.{timestamp}.{body}` keyed by the `whsec_` secret. Other senders may
//! put a hex HMAC of the raw body in `x-webhook-signature`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::TaskId;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Optional prefix some senders put in front of the hex digest.
const SIGNATURE_PREFIX: &str = "sha256=";

pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";

/// Maximum distance between `webhook-timestamp` and now.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Replicate secrets are `whsec_` followed by the base64 key.
const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1,";

type HmacSha256 = Hmac<Sha256>;

/// Callback URL a provider should post completion events to.
pub fn callback_url(public_base_url: &str, provider: &str, task_id: TaskId) -> String {
    format!(
        "{}/api/v1/webhooks/{provider}/{task_id}",
        public_base_url.trim_end_matches('/')
    )
}

/// Compute the hex HMAC-SHA256 signature of a webhook body.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature header value against the body in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Some(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Header values of a Standard Webhooks delivery.
#[derive(Debug, Clone, Copy)]
pub struct StandardSignature<'a> {
    pub id: &'a str,
    pub timestamp: &'a str,
    /// Space-separated `v1,<base64>` entries.
    pub signatures: &'a str,
}

/// Sign a delivery the way Replicate does. Returns a `v1,<base64>` entry,
/// or `None` when a `whsec_` secret is not valid base64.
pub fn sign_standard(secret: &str, id: &str, timestamp: i64, body: &[u8]) -> Option<String> {
    let mac = standard_mac(secret, id, &timestamp.to_string(), body)?;
    Some(format!(
        "{SIGNATURE_VERSION}{}",
        BASE64.encode(mac.finalize().into_bytes())
    ))
}

/// Verify a Standard Webhooks delivery at unix time `now`. Any one
/// matching `v1` entry is enough.
pub fn verify_standard_signature(
    secret: &str,
    delivery: &StandardSignature<'_>,
    body: &[u8],
    now: i64,
) -> bool {
    let timestamp = delivery.timestamp.trim();
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - sent_at).abs() > TIMESTAMP_TOLERANCE_SECS {
        return false;
    }
    let Some(mac) = standard_mac(secret, delivery.id.trim(), timestamp, body) else {
        return false;
    };
    delivery
        .signatures
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix(SIGNATURE_VERSION))
        .filter_map(|encoded| BASE64.decode(encoded).ok())
        .any(|expected| mac.clone().verify_slice(&expected).is_ok())
}

fn standard_mac(secret: &str, id: &str, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
    let key = match secret.strip_prefix(SECRET_PREFIX) {
        Some(encoded) => BASE64.decode(encoded).ok()?,
        None => secret.as_bytes().to_vec(),
    };
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(mac)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
            .collect()
    }
}
