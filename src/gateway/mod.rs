//! Payment Gateway Adapter
//!
//! Translates outgoing payment intents into provider API calls and turns
//! signed provider callbacks into payment outcomes. The rest of the crate
//! only sees the `PaymentGateway` trait; `PaymobGateway` is the one
//! production implementation.

mod callback;
mod paymob;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::Amount;

pub use callback::{
    sign, verify, CallbackFields, GatewayOutcome, TransactionCallback, HMAC_FIELDS,
};
pub use paymob::{PaymobConfig, PaymobGateway};

/// Money the platform wants to collect online
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// Our payment id, sent to the provider as the merchant order id
    pub payment_id: Uuid,
    pub amount: Amount,
    pub currency: String,
    pub description: String,
    pub billing: BillingContact,
}

/// Payer details the provider requires on the payment key
#[derive(Debug, Clone, Default)]
pub struct BillingContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl BillingContact {
    /// Split a full name into first and last name
    pub fn from_full_name(name: &str, email: &str, phone: Option<String>) -> Self {
        let mut parts = name.split_whitespace();
        let first_name = parts.next().unwrap_or("NA").to_string();
        let rest: Vec<&str> = parts.collect();
        let last_name = if rest.is_empty() {
            "NA".to_string()
        } else {
            rest.join(" ")
        };

        Self {
            first_name,
            last_name,
            email: email.to_string(),
            phone,
        }
    }
}

/// A hosted checkout created at the provider
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub provider_order_id: String,
    pub checkout_url: String,
}

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Gateway is not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

/// An online payment provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Stored in `payments.provider`
    fn provider_id(&self) -> &'static str;

    /// Register the intent with the provider and return where to send the payer
    async fn create_checkout(&self, intent: &PaymentIntent) -> Result<CheckoutSession, GatewayError>;

    /// Check a callback's signature in constant time
    fn verify_signature(&self, fields: &CallbackFields, hmac: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_contact_name_split() {
        let contact = BillingContact::from_full_name("Mona Adel Hassan", "m@x.eg", None);
        assert_eq!(contact.first_name, "Mona");
        assert_eq!(contact.last_name, "Adel Hassan");

        let single = BillingContact::from_full_name("Acme", "a@x.eg", None);
        assert_eq!(single.last_name, "NA");
    }
}
