//! Stripe API client and webhook signature verification.
//!
//! Only the handful of calls the billing routes need are wrapped here. Stripe's
//! API takes form-encoded bodies and returns JSON.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::instrument;
use uuid::Uuid;

use crate::config::StripeConfig;

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";

/// Maximum accepted age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing or malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("Webhook timestamp outside the tolerance window")]
    StaleTimestamp,

    #[error("Webhook signature does not match")]
    Mismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Stripe API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`) against
/// the raw request body.
///
/// The signed message is `"{t}.{payload}"` under HMAC-SHA256 with the endpoint
/// secret. Any one matching `v1` entry is enough; other schemes are ignored.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SignatureError::MalformedHeader)?;
        match key {
            "t" => timestamp = Some(value),
            "v1" => {
                signatures.push(hex::decode(value).map_err(|_| SignatureError::MalformedHeader)?)
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    let issued_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    if (now - issued_at).abs() > tolerance_secs {
        return Err(SignatureError::StaleTimestamp);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice compares in constant time
    if signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok())
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ---------------------------------------------------------------------------
// Webhook events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<String>,
    pub client_reference_id: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<Price>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Price {
    pub id: String,
}

impl SubscriptionObject {
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .iter()
            .find_map(|item| item.price.as_ref().map(|p| p.id.as_str()))
    }

    /// Newer API versions report the period end per item instead of on the
    /// subscription itself.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.items.data.iter().find_map(|item| item.current_period_end))
    }
}

#[derive(Debug, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
}

/// The subset of event types billing cares about.
#[derive(Debug)]
pub enum WebhookEvent {
    CheckoutCompleted(CheckoutSessionObject),
    SubscriptionChanged(SubscriptionObject),
    PaymentFailed(InvoiceObject),
    Other,
}

impl Event {
    pub fn classify(&self) -> Result<WebhookEvent, serde_json::Error> {
        let object = self.data.object.clone();
        Ok(match self.event_type.as_str() {
            "checkout.session.completed" => {
                WebhookEvent::CheckoutCompleted(serde_json::from_value(object)?)
            }
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted" => {
                WebhookEvent::SubscriptionChanged(serde_json::from_value(object)?)
            }
            "invoice.payment_failed" => WebhookEvent::PaymentFailed(serde_json::from_value(object)?),
            _ => WebhookEvent::Other,
        })
    }
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Customer {
    pub id: String,
}

/// Checkout and billing-portal sessions both hand back a redirect URL.
#[derive(Debug, Deserialize)]
pub struct HostedSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    secret_key: SecretString,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            inner: Arc::new(StripeClientInner {
                client,
                secret_key: config.secret_key.clone(),
            }),
        })
    }

    #[instrument(skip(self, email))]
    pub async fn create_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<Customer, StripeError> {
        let mut form = vec![("metadata[user_id]", user_id.to_string())];
        if let Some(email) = email {
            form.push(("email", email.to_string()));
        }
        self.post_form("/customers", &form).await
    }

    #[instrument(skip(self, success_url, cancel_url))]
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        user_id: Uuid,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<HostedSession, StripeError> {
        let form = [
            ("mode", "subscription".to_string()),
            ("customer", customer_id.to_string()),
            ("client_reference_id", user_id.to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", success_url.to_string()),
            ("cancel_url", cancel_url.to_string()),
        ];
        self.post_form("/checkout/sessions", &form).await
    }

    #[instrument(skip(self, return_url))]
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<HostedSession, StripeError> {
        let form = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        self.post_form("/billing_portal/sessions", &form).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, StripeError> {
        let response = self
            .inner
            .client
            .post(format!("{STRIPE_API_URL}{path}"))
            .bearer_auth(self.inner.secret_key.expose_secret())
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed"}"#;

    fn sign(timestamp: i64, payload: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(now, PAYLOAD, SECRET));
        assert_eq!(
            verify_webhook_signature(PAYLOAD, &header, SECRET, now + 10, SIGNATURE_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn accepts_when_any_v1_matches() {
        let now = 1_700_000_000;
        let header = format!(
            "t={now},v1={},v0=abc,v1={}",
            "00".repeat(32),
            sign(now, PAYLOAD, SECRET)
        );
        assert!(verify_webhook_signature(PAYLOAD, &header, SECRET, now, 300).is_ok());
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(now, PAYLOAD, SECRET));
        let result = verify_webhook_signature(b"{\"id\":\"evt_2\"}", &header, SECRET, now, 300);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(now, PAYLOAD, "whsec_other"));
        let result = verify_webhook_signature(PAYLOAD, &header, SECRET, now, 300);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let signed_at = 1_700_000_000;
        let header = format!("t={signed_at},v1={}", sign(signed_at, PAYLOAD, SECRET));
        let result = verify_webhook_signature(PAYLOAD, &header, SECRET, signed_at + 301, 300);
        assert_eq!(result, Err(SignatureError::StaleTimestamp));
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "garbage", "t=abc,v1=00", "t=1700000000", "v1=00ff", "t=1700000000,v1=zz"] {
            assert_eq!(
                verify_webhook_signature(PAYLOAD, header, SECRET, 1_700_000_000, 300),
                Err(SignatureError::MalformedHeader),
                "header {header:?} should be malformed"
            );
        }
    }

    #[test]
    fn classifies_subscription_events() {
        let event: Event = serde_json::from_value(serde_json::json!({
            "id": "evt_123",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "cancel_at_period_end": true,
                "items": { "data": [
                    { "price": { "id": "price_monthly" }, "current_period_end": 1_800_000_000 }
                ] }
            } }
        }))
        .unwrap();

        match event.classify().unwrap() {
            WebhookEvent::SubscriptionChanged(sub) => {
                assert_eq!(sub.customer, "cus_1");
                assert_eq!(sub.price_id(), Some("price_monthly"));
                assert_eq!(sub.period_end(), Some(1_800_000_000));
                assert!(sub.cancel_at_period_end);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_other() {
        let event: Event = serde_json::from_value(serde_json::json!({
            "id": "evt_9",
            "type": "charge.refunded",
            "data": { "object": {} }
        }))
        .unwrap();
        assert!(matches!(event.classify().unwrap(), WebhookEvent::Other));
    }
}
