//! Paymob Accept client
//!
//! Checkout takes three calls: authenticate, register the order, then
//! request a payment key bound to the card integration. The payer is sent
//! to the hosted iframe with that key.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    callback, BillingContact, CallbackFields, CheckoutSession, GatewayError, PaymentGateway,
    PaymentIntent,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Seconds a payment key stays valid
const PAYMENT_KEY_EXPIRATION: u64 = 3600;

/// Placeholder for billing fields the platform does not collect
const NOT_AVAILABLE: &str = "NA";

/// Paymob credentials
#[derive(Clone)]
pub struct PaymobConfig {
    pub base_url: String,
    pub api_key: String,
    pub integration_id: i64,
    pub iframe_id: String,
    pub hmac_secret: String,
}

impl fmt::Debug for PaymobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymobConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("integration_id", &self.integration_id)
            .field("iframe_id", &self.iframe_id)
            .field("hmac_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: i64,
}

/// Paymob implementation of `PaymentGateway`
#[derive(Debug, Clone)]
pub struct PaymobGateway {
    config: PaymobConfig,
    http: reqwest::Client,
}

impl PaymobGateway {
    pub fn new(config: PaymobConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, GatewayError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(path, status = status.as_u16(), "Paymob request rejected");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn authenticate(&self) -> Result<String, GatewayError> {
        let response: TokenResponse = self
            .post_json("/api/auth/tokens", &json!({ "api_key": self.config.api_key }))
            .await?;
        Ok(response.token)
    }

    async fn register_order(&self, auth_token: &str, intent: &PaymentIntent) -> Result<i64, GatewayError> {
        let response: OrderResponse = self
            .post_json(
                "/api/ecommerce/orders",
                &json!({
                    "auth_token": auth_token,
                    "delivery_needed": false,
                    "amount_cents": intent.amount.to_minor_units(),
                    "currency": intent.currency,
                    "merchant_order_id": intent.payment_id.to_string(),
                    "items": [{
                        "name": intent.description,
                        "amount_cents": intent.amount.to_minor_units(),
                        "quantity": 1
                    }]
                }),
            )
            .await?;
        Ok(response.id)
    }

    async fn request_payment_key(
        &self,
        auth_token: &str,
        order_id: i64,
        intent: &PaymentIntent,
    ) -> Result<String, GatewayError> {
        let response: TokenResponse = self
            .post_json(
                "/api/acceptance/payment_keys",
                &json!({
                    "auth_token": auth_token,
                    "amount_cents": intent.amount.to_minor_units(),
                    "expiration": PAYMENT_KEY_EXPIRATION,
                    "order_id": order_id,
                    "billing_data": billing_data(&intent.billing),
                    "currency": intent.currency,
                    "integration_id": self.config.integration_id,
                    "lock_order_when_paid": true
                }),
            )
            .await?;
        Ok(response.token)
    }
}

fn billing_data(contact: &BillingContact) -> Value {
    json!({
        "first_name": contact.first_name,
        "last_name": contact.last_name,
        "email": contact.email,
        "phone_number": contact.phone.as_deref().unwrap_or(NOT_AVAILABLE),
        "apartment": NOT_AVAILABLE,
        "floor": NOT_AVAILABLE,
        "street": NOT_AVAILABLE,
        "building": NOT_AVAILABLE,
        "shipping_method": NOT_AVAILABLE,
        "postal_code": NOT_AVAILABLE,
        "city": NOT_AVAILABLE,
        "country": "EG",
        "state": NOT_AVAILABLE
    })
}

#[async_trait]
impl PaymentGateway for PaymobGateway {
    fn provider_id(&self) -> &'static str {
        "paymob"
    }

    async fn create_checkout(&self, intent: &PaymentIntent) -> Result<CheckoutSession, GatewayError> {
        let auth_token = self.authenticate().await?;
        let order_id = self.register_order(&auth_token, intent).await?;
        let payment_key = self.request_payment_key(&auth_token, order_id, intent).await?;

        tracing::info!(
            payment_id = %intent.payment_id,
            provider_order_id = order_id,
            "Paymob checkout created"
        );

        Ok(CheckoutSession {
            provider_order_id: order_id.to_string(),
            checkout_url: format!(
                "{}/api/acceptance/iframes/{}?payment_token={}",
                self.config.base_url, self.config.iframe_id, payment_key
            ),
        })
    }

    fn verify_signature(&self, fields: &CallbackFields, hmac: &str) -> bool {
        callback::verify(&self.config.hmac_secret, fields, hmac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_redacts_secrets() {
        let config = PaymobConfig {
            base_url: "https://accept.paymob.com".to_string(),
            api_key: "live-api-key".to_string(),
            integration_id: 1,
            iframe_id: "2".to_string(),
            hmac_secret: "live-hmac".to_string(),
        };

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("live-api-key"));
        assert!(!rendered.contains("live-hmac"));
        assert!(rendered.contains("accept.paymob.com"));
    }

    #[test]
    fn test_billing_data_fills_placeholders() {
        let contact = BillingContact::from_full_name("Omar Farouk", "omar@example.eg", None);
        let data = billing_data(&contact);

        assert_eq!(data["first_name"], "Omar");
        assert_eq!(data["phone_number"], "NA");
        assert_eq!(data["city"], "NA");
    }
}
