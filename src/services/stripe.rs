//! Minimal Stripe REST client
//!
//! Covers exactly the surface the billing reconciler needs: webhook signature
//! verification and parsing, product/subscription retrieval, checkout line
//! items, and customer/checkout-session creation.

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use crate::errors::{Result, ServiceError};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

// Reject signed timestamps older than this to blunt replay of captured
// payloads.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    base_url: String,
}

/// A verified webhook event. `data.object` stays raw json; the reconciler
/// parses it per event type.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub customer: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: StripePrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    pub product: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    pub default_price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: String,
    pub url: Option<String>,
    pub customer: Option<String>,
    pub payment_intent: Option<String>,
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeLineItem {
    pub price: Option<StripePrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

/// Parameters for creating a checkout session.
pub struct CheckoutSessionParams {
    pub mode: &'static str,
    pub customer: String,
    pub price: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
}

impl StripeClient {
    pub fn new(secret_key: String, webhook_secret: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            webhook_secret,
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    /// Point the client at a different endpoint (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Verify the `Stripe-Signature` header against the raw payload and parse
    /// the event. Fails closed: nothing downstream sees an unverified event.
    pub fn verify_and_parse(&self, payload: &[u8], signature_header: &str) -> Result<StripeEvent> {
        verify_signature(
            &self.webhook_secret,
            payload,
            signature_header,
            Utc::now().timestamp(),
        )?;

        serde_json::from_slice(payload)
            .map_err(|e| ServiceError::InvalidRequest(format!("Malformed webhook payload: {}", e)))
    }

    pub async fn retrieve_product(&self, product_id: &str) -> Result<StripeProduct> {
        self.get(&format!("products/{}", product_id)).await
    }

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        self.get(&format!("subscriptions/{}", subscription_id)).await
    }

    pub async fn list_checkout_line_items(
        &self,
        session_id: &str,
    ) -> Result<StripeList<StripeLineItem>> {
        self.get(&format!("checkout/sessions/{}/line_items?limit=1", session_id))
            .await
    }

    pub async fn create_customer(&self, email: &str) -> Result<StripeCustomer> {
        self.post("customers", &[("email".to_string(), email.to_string())])
            .await
    }

    pub async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<StripeCheckoutSession> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".to_string(), params.mode.to_string()),
            ("customer".to_string(), params.customer),
            ("line_items[0][price]".to_string(), params.price),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), params.success_url),
            ("cancel_url".to_string(), params.cancel_url),
            ("allow_promotion_codes".to_string(), "true".to_string()),
        ];
        for (key, value) in params.metadata {
            form.push((format!("metadata[{}]", key), value));
        }
        self.post("checkout/sessions", &form).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Check a `t=...,v1=...` signature header: HMAC-SHA256 of
/// `"{timestamp}.{payload}"` with the webhook secret, hex encoded. Any `v1`
/// entry may match; the timestamp must be within tolerance of `now`.
fn verify_signature(secret: &str, payload: &[u8], header: &str, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::SignatureInvalid("missing timestamp".to_string()))?;

    if signatures.is_empty() {
        return Err(ServiceError::SignatureInvalid(
            "no v1 signatures in header".to_string(),
        ));
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(ServiceError::SignatureInvalid(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::SignatureInvalid("invalid webhook secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if signatures.iter().any(|s| *s == expected) {
        Ok(())
    } else {
        Err(ServiceError::SignatureInvalid(
            "signature mismatch".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"id":"evt_1","type":"charge.refunded","data":{"object":{}}}"#;
        let header = sign(payload, 1_700_000_000, SECRET);
        assert!(verify_signature(SECRET, payload, &header, 1_700_000_000).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = b"{}";
        let header = sign(payload, 1_700_000_000, "whsec_other");
        let err = verify_signature(SECRET, payload, &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureInvalid(_)));
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = sign(b"{\"amount\":10}", 1_700_000_000, SECRET);
        let err =
            verify_signature(SECRET, b"{\"amount\":9999}", &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureInvalid(_)));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let header = sign(payload, 1_700_000_000, SECRET);
        let err = verify_signature(SECRET, payload, &header, 1_700_000_000 + 600).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureInvalid(_)));
    }

    #[test]
    fn rejects_malformed_header() {
        let err = verify_signature(SECRET, b"{}", "garbage", 1_700_000_000).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureInvalid(_)));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let payload = b"{}";
        let timestamp = 1_700_000_000;
        let good = sign(payload, timestamp, SECRET);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", timestamp, good_sig);
        assert!(verify_signature(SECRET, payload, &header, timestamp).is_ok());
    }

    #[test]
    fn event_parses_from_payload() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_123","mode":"payment"}}}"#;
        let event: StripeEvent = serde_json::from_slice(payload).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.data.object["id"], "cs_123");
    }
}
