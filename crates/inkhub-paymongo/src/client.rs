// PayMongo REST client.
//
// Checkout sessions collect the down payment; payment links collect the
// remaining balance. Both endpoints answer with `data.id` and
// `data.attributes.checkout_url`.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use inkhub_core::config::Config;
use inkhub_core::payments::{
    CheckoutGateway, CheckoutRequest, CheckoutSession, PaymentLink, PaymentLinkRequest,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const CHECKOUT_SESSIONS_PATH: &str = "/v1/checkout_sessions";
const LINKS_PATH: &str = "/v1/links";

// ---------------------------------------------------------------------------
// PayMongoClient
// ---------------------------------------------------------------------------

pub struct PayMongoClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
    currency: String,
}

impl PayMongoClient {
    pub fn new(base_url: &str, secret_key: &str, currency: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: basic_auth(secret_key),
            currency: currency.to_string(),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("authorization", &self.auth_header)
            .header("accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("invalid JSON from {path}"))?;
        if !status.is_success() {
            let detail = error_detail(&payload).unwrap_or("no detail");
            warn!(%status, path, detail, "paymongo rejected request");
            bail!("paymongo returned {status}: {detail}");
        }
        debug!(path, "paymongo request succeeded");
        Ok(payload)
    }

    pub async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> anyhow::Result<CheckoutSession> {
        let body = checkout_session_body(req, &self.currency);
        let payload = self.post(CHECKOUT_SESSIONS_PATH, &body).await?;
        let (id, checkout_url) = parse_resource(&payload)?;
        Ok(CheckoutSession { id, checkout_url })
    }

    pub async fn create_payment_link(&self, req: &PaymentLinkRequest) -> anyhow::Result<PaymentLink> {
        let body = json!({
            "data": {
                "attributes": {
                    "amount": req.amount,
                    "description": req.description,
                    "remarks": req.remarks,
                }
            }
        });
        let payload = self.post(LINKS_PATH, &body).await?;
        let (id, checkout_url) = parse_resource(&payload)?;
        Ok(PaymentLink { id, checkout_url })
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// The gateway the server hands to the marketplace.
pub enum Gateway {
    /// A secret key is configured.
    Active(PayMongoClient),
    /// No secret key; every payment call fails.
    Disabled,
}

impl Gateway {
    /// `Active` when `paymongo_secret_key` is set and non-empty.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.paymongo_secret_key {
            Some(key) if !key.is_empty() => Gateway::Active(PayMongoClient::new(
                &config.payments.base_url,
                key,
                &config.payments.currency,
            )),
            _ => Gateway::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Gateway::Active(_))
    }
}

#[async_trait]
impl CheckoutGateway for Gateway {
    async fn create_checkout_session(&self, req: &CheckoutRequest) -> anyhow::Result<CheckoutSession> {
        match self {
            Gateway::Active(client) => client.create_checkout_session(req).await,
            Gateway::Disabled => bail!("payment gateway not configured"),
        }
    }

    async fn create_payment_link(&self, req: &PaymentLinkRequest) -> anyhow::Result<PaymentLink> {
        match self {
            Gateway::Active(client) => client.create_payment_link(req).await,
            Gateway::Disabled => bail!("payment gateway not configured"),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// PayMongo authenticates with the secret key as the Basic username and an
/// empty password.
fn basic_auth(secret_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{secret_key}:")))
}

pub(crate) fn checkout_session_body(req: &CheckoutRequest, fallback_currency: &str) -> Value {
    let currency = if req.currency.is_empty() {
        fallback_currency
    } else {
        req.currency.as_str()
    };
    json!({
        "data": {
            "attributes": {
                "billing": {
                    "name": req.billing_name,
                    "email": req.billing_email,
                },
                "line_items": [{
                    "currency": currency,
                    "amount": req.amount,
                    "description": req.description,
                    "name": req.line_item,
                    "quantity": 1,
                }],
                "payment_method_types": req.payment_methods,
                "description": req.description,
                "success_url": req.success_url,
                "cancel_url": req.cancel_url,
                "send_email_receipt": false,
                "show_description": true,
                "show_line_items": true,
            }
        }
    })
}

/// Extract `(data.id, data.attributes.checkout_url)`.
pub(crate) fn parse_resource(payload: &Value) -> anyhow::Result<(String, String)> {
    let data = payload.get("data").ok_or_else(|| anyhow!("response missing data"))?;
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("response missing data.id"))?;
    let url = data
        .pointer("/attributes/checkout_url")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("response missing checkout_url"))?;
    Ok((id.to_string(), url.to_string()))
}

/// First `errors[].detail` of an error response.
fn error_detail(payload: &Value) -> Option<&str> {
    payload.pointer("/errors/0/detail").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn checkout_request() -> CheckoutRequest {
        CheckoutRequest {
            amount: 20_000,
            currency: "PHP".into(),
            description: "Down payment for Flyers".into(),
            line_item: "Flyers".into(),
            billing_name: "Ana Cruz".into(),
            billing_email: "ana@example.com".into(),
            payment_methods: vec!["gcash".into(), "card".into()],
            success_url: "http://localhost:8000/success".into(),
            cancel_url: "http://localhost:8000/cancel".into(),
        }
    }

    #[test]
    fn basic_auth_uses_key_as_username() {
        // base64("sk_test_123:")
        assert_eq!(basic_auth("sk_test_123"), "Basic c2tfdGVzdF8xMjM6");
    }

    #[test]
    fn checkout_body_shape() {
        let body = checkout_session_body(&checkout_request(), "PHP");
        let attrs = &body["data"]["attributes"];
        assert_eq!(attrs["billing"]["email"], "ana@example.com");
        assert_eq!(attrs["line_items"][0]["amount"], 20_000);
        assert_eq!(attrs["line_items"][0]["quantity"], 1);
        assert_eq!(attrs["payment_method_types"][1], "card");
    }

    #[test]
    fn parse_resource_requires_fields() {
        let ok = json!({"data": {"id": "cs_1", "attributes": {"checkout_url": "https://x"}}});
        assert_eq!(
            parse_resource(&ok).unwrap(),
            ("cs_1".to_string(), "https://x".to_string())
        );
        assert!(parse_resource(&json!({"data": {"id": "cs_1"}})).is_err());
        assert!(parse_resource(&json!({})).is_err());
    }

    #[tokio::test]
    async fn checkout_session_round_trip() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/checkout_sessions")
                    .header("authorization", "Basic c2tfdGVzdF8xMjM6")
                    .body_contains("ana@example.com");
                then.status(200).json_body(json!({
                    "data": {
                        "id": "cs_abc",
                        "attributes": {"checkout_url": "https://checkout.paymongo.com/cs_abc"}
                    }
                }));
            })
            .await;

        let client = PayMongoClient::new(&server.base_url(), "sk_test_123", "PHP");
        let session = client.create_checkout_session(&checkout_request()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(session.id, "cs_abc");
        assert_eq!(session.checkout_url, "https://checkout.paymongo.com/cs_abc");
    }

    #[tokio::test]
    async fn payment_link_round_trip() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/links").body_contains("80000");
                then.status(200).json_body(json!({
                    "data": {
                        "id": "link_1",
                        "attributes": {"checkout_url": "https://pm.link/link_1"}
                    }
                }));
            })
            .await;

        let client = PayMongoClient::new(&server.base_url(), "sk_test_123", "PHP");
        let link = client
            .create_payment_link(&PaymentLinkRequest {
                amount: 80_000,
                description: "Remaining payment".into(),
                remarks: "request 1".into(),
            })
            .await
            .unwrap();
        assert_eq!(link.id, "link_1");
    }

    #[tokio::test]
    async fn error_response_surfaces_detail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/checkout_sessions");
                then.status(400).json_body(json!({
                    "errors": [{"code": "parameter_invalid", "detail": "amount is too low"}]
                }));
            })
            .await;

        let client = PayMongoClient::new(&server.base_url(), "sk_test_123", "PHP");
        let err = client
            .create_checkout_session(&checkout_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("amount is too low"));
    }

    #[tokio::test]
    async fn disabled_gateway_fails() {
        let gateway = Gateway::Disabled;
        assert!(!gateway.is_active());
        let err = CheckoutGateway::create_checkout_session(&gateway, &checkout_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
