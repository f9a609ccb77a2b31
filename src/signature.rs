use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// CardGateway signature headers.
pub const CARD_TIMESTAMP_HEADER: &str = "x-timestamp";
pub const CARD_SIGNATURE_HEADER: &str = "x-signature";

/// WalletGateway signs a provider-fixed, ordered field set, not the full body.
/// The list is compiled in and never derived from the payload itself, so an
/// attacker cannot shrink the authenticated surface by omitting fields.
pub const WALLET_SIGNED_FIELDS: [&str; 6] = [
    "event_id",
    "transaction_no",
    "merchant_order_id",
    "amount_minor",
    "currency",
    "status",
];

/// SHA-256 hex digest of a raw payload; retained on events for audit.
pub fn payload_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Short digest for log lines. Raw bodies and secrets are never logged.
fn truncated_digest(body: &[u8]) -> String {
    let mut digest = payload_digest(body);
    digest.truncate(16);
    digest
}

/// Per-provider authenticity checks for inbound webhooks.
///
/// Secrets are immutable process-wide configuration, injected once at startup.
/// Verification is pure and one-shot; a failure is a hard reject and nothing
/// downstream of it runs.
#[derive(Clone)]
pub struct WebhookVerifier {
    card_secret: String,
    wallet_secret: String,
    tolerance_secs: u64,
    max_body_bytes: usize,
}

impl WebhookVerifier {
    pub fn new(
        card_secret: String,
        wallet_secret: String,
        tolerance_secs: u64,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            card_secret,
            wallet_secret,
            tolerance_secs,
            max_body_bytes,
        }
    }

    /// CardGateway: HMAC-SHA256 over `"{timestamp}." + raw body` using the
    /// shared signing secret, delivered in `X-Timestamp`/`X-Signature`.
    pub fn verify_card(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ServiceError> {
        if body.is_empty() || body.len() > self.max_body_bytes {
            warn!(
                body_len = body.len(),
                "card webhook rejected: body size anomaly"
            );
            return Err(ServiceError::AuthenticationFailure(
                "body size anomaly".into(),
            ));
        }

        let timestamp = header_str(headers, CARD_TIMESTAMP_HEADER)?;
        let signature = header_str(headers, CARD_SIGNATURE_HEADER)?;

        let ts: i64 = timestamp.parse().map_err(|_| {
            ServiceError::AuthenticationFailure("unparseable signature timestamp".into())
        })?;
        let now = chrono::Utc::now().timestamp();
        if (now - ts).unsigned_abs() > self.tolerance_secs {
            warn!(
                digest = %truncated_digest(body),
                "card webhook rejected: signature timestamp outside tolerance"
            );
            return Err(ServiceError::AuthenticationFailure(
                "signature timestamp outside tolerance".into(),
            ));
        }

        let provided = hex::decode(signature).map_err(|_| {
            ServiceError::AuthenticationFailure("signature is not valid hex".into())
        })?;

        let mut mac = HmacSha256::new_from_slice(self.card_secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac init: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&provided).map_err(|_| {
            warn!(
                digest = %truncated_digest(body),
                "card webhook rejected: signature mismatch"
            );
            ServiceError::AuthenticationFailure("signature mismatch".into())
        })
    }

    /// WalletGateway: keyed hash over the fixed ordered field concatenation,
    /// compared against the payload's `signature` field.
    ///
    /// Fields outside [`WALLET_SIGNED_FIELDS`] are NOT covered by this check;
    /// tampering with them is undetectable by signature alone.
    pub fn verify_wallet(&self, body: &[u8]) -> Result<(), ServiceError> {
        if body.is_empty() || body.len() > self.max_body_bytes {
            warn!(
                body_len = body.len(),
                "wallet webhook rejected: body size anomaly"
            );
            return Err(ServiceError::AuthenticationFailure(
                "body size anomaly".into(),
            ));
        }

        let json: serde_json::Value = serde_json::from_slice(body).map_err(|_| {
            warn!(
                digest = %truncated_digest(body),
                "wallet webhook rejected: unparseable body"
            );
            ServiceError::AuthenticationFailure("unparseable body".into())
        })?;

        let signature = json
            .get("signature")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ServiceError::AuthenticationFailure("missing signature field".into()))?;
        let provided = hex::decode(signature).map_err(|_| {
            ServiceError::AuthenticationFailure("signature is not valid hex".into())
        })?;

        let canonical = wallet_canonical_string(&json).ok_or_else(|| {
            warn!(
                digest = %truncated_digest(body),
                "wallet webhook rejected: signed field missing"
            );
            ServiceError::AuthenticationFailure("signed field missing".into())
        })?;

        let mut mac = HmacSha256::new_from_slice(self.wallet_secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac init: {}", e)))?;
        mac.update(canonical.as_bytes());
        mac.verify_slice(&provided).map_err(|_| {
            warn!(
                digest = %truncated_digest(body),
                "wallet webhook rejected: signature mismatch"
            );
            ServiceError::AuthenticationFailure("signature mismatch".into())
        })
    }
}

/// Builds the `a|b|c` canonical string over [`WALLET_SIGNED_FIELDS`].
/// Returns `None` when any signed field is absent.
fn wallet_canonical_string(json: &serde_json::Value) -> Option<String> {
    let mut parts = Vec::with_capacity(WALLET_SIGNED_FIELDS.len());
    for field in WALLET_SIGNED_FIELDS {
        let value = json.get(field)?;
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        parts.push(rendered);
    }
    Some(parts.join("|"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ServiceError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::AuthenticationFailure(format!("missing {} header", name)))
}

/// Computes the CardGateway signature for a body; used by tests and tooling.
pub fn card_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Computes the WalletGateway signature over an already-canonical field string.
pub fn wallet_signature(secret: &str, canonical: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
