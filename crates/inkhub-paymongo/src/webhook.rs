// Webhook signature verification and event parsing.
//
// The `Paymongo-Signature` header looks like `t=<unix>,te=<hex>,li=<hex>`.
// `te` is the test-mode signature and `li` the live-mode one; each is the
// HMAC-SHA256 of `"{t}.{raw body}"` keyed with the webhook secret.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "paymongo-signature";

/// Event type emitted once a checkout session has been paid.
pub const CHECKOUT_PAID: &str = "checkout_session.payment.paid";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("malformed signature header")]
    MalformedSignature,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SignatureHeader<'a> {
    timestamp: &'a str,
    test: Option<&'a str>,
    live: Option<&'a str>,
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, WebhookError> {
    let mut parsed = SignatureHeader::default();
    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(WebhookError::MalformedSignature)?;
        match key {
            "t" => parsed.timestamp = value,
            "te" if !value.is_empty() => parsed.test = Some(value),
            "li" if !value.is_empty() => parsed.live = Some(value),
            _ => {}
        }
    }
    if parsed.timestamp.is_empty() || (parsed.test.is_none() && parsed.live.is_none()) {
        return Err(WebhookError::MalformedSignature);
    }
    Ok(parsed)
}

/// Hex HMAC-SHA256 of `"{timestamp}.{body}"`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a webhook against the configured secret. Either the test-mode or
/// the live-mode signature may match.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookError> {
    let header = parse_header(header.ok_or(WebhookError::MissingSignature)?)?;
    let expected = sign(secret, header.timestamp, body);
    let matches = [header.test, header.live]
        .into_iter()
        .flatten()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));
    if matches {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// The parts of a webhook event the marketplace acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_type: String,
    /// Id of the resource the event is about, e.g. a checkout session.
    pub resource_id: Option<String>,
}

impl WebhookEvent {
    /// Session id when this is a paid checkout.
    pub fn paid_checkout_session(&self) -> Option<&str> {
        if self.event_type == CHECKOUT_PAID {
            self.resource_id.as_deref()
        } else {
            None
        }
    }
}

/// Parse `{"data": {"attributes": {"type": ..., "data": {"id": ...}}}}`.
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let attributes = value
        .pointer("/data/attributes")
        .ok_or_else(|| WebhookError::InvalidPayload("missing data.attributes".into()))?;
    let event_type = attributes
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| WebhookError::InvalidPayload("missing event type".into()))?;
    let resource_id = attributes
        .pointer("/data/id")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(WebhookEvent {
        event_type: event_type.to_string(),
        resource_id,
    })
}
