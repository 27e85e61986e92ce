// PayMongo integration: hosted checkout sessions, payment links and webhook
// signature verification.

pub mod client;
pub mod webhook;

pub use client::{Gateway, PayMongoClient};
pub use webhook::{parse_event, verify_signature, WebhookError, WebhookEvent, SIGNATURE_HEADER};
