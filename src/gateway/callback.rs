//! Paymob callback parsing and HMAC verification
//!
//! Paymob signs a transaction by concatenating a fixed list of fields and
//! computing HMAC-SHA512 over the result. The same fields arrive in two
//! shapes: the processed callback (nested JSON under `obj`) and the
//! redirect query string (flat keys, with the order id under `order`).

use std::collections::{BTreeMap, HashMap};

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha512;
use uuid::Uuid;

use super::GatewayError;
use crate::domain::PaymentStatus;

type HmacSha512 = Hmac<Sha512>;

/// Signed fields, in signing order
pub const HMAC_FIELDS: [&str; 20] = [
    "amount_cents",
    "created_at",
    "currency",
    "error_occured",
    "has_parent_transaction",
    "id",
    "integration_id",
    "is_3d_secure",
    "is_auth",
    "is_capture",
    "is_refunded",
    "is_standalone_payment",
    "is_voided",
    "order.id",
    "owner",
    "pending",
    "source_data.pan",
    "source_data.sub_type",
    "source_data.type",
    "success",
];

/// Unsigned fields we still read from a callback
const EXTRA_FIELDS: [&str; 2] = ["order.merchant_order_id", "data.message"];

/// Flattened callback values keyed by dotted path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackFields(BTreeMap<String, String>);

impl CallbackFields {
    /// Parse `{"type": "TRANSACTION", "obj": {...}}`
    pub fn from_processed_json(body: &Value) -> Result<Self, GatewayError> {
        match body.get("type").and_then(Value::as_str) {
            Some("TRANSACTION") => {}
            Some(other) => {
                return Err(GatewayError::InvalidCallback(format!(
                    "unsupported callback type {}",
                    other
                )))
            }
            None => return Err(GatewayError::InvalidCallback("missing type".to_string())),
        }

        let obj = body
            .get("obj")
            .filter(|v| v.is_object())
            .ok_or_else(|| GatewayError::InvalidCallback("missing obj".to_string()))?;

        let fields = HMAC_FIELDS
            .iter()
            .chain(EXTRA_FIELDS.iter())
            .map(|path| (path.to_string(), lookup(obj, path)))
            .collect();

        Ok(Self(fields))
    }

    /// Parse the redirect query string
    pub fn from_redirect_query(query: &HashMap<String, String>) -> Self {
        let mut fields = BTreeMap::new();

        for path in HMAC_FIELDS.iter() {
            let key = if *path == "order.id" { "order" } else { path };
            fields.insert(path.to_string(), query.get(key).cloned().unwrap_or_default());
        }

        let merchant_order_id = query.get("merchant_order_id").cloned().unwrap_or_default();
        fields.insert("order.merchant_order_id".to_string(), merchant_order_id);
        let message = query.get("data.message").cloned().unwrap_or_default();
        fields.insert("data.message".to_string(), message);

        Self(fields)
    }

    pub fn get(&self, path: &str) -> &str {
        self.0.get(path).map(String::as_str).unwrap_or("")
    }

    pub fn insert(&mut self, path: &str, value: impl Into<String>) {
        self.0.insert(path.to_string(), value.into());
    }

    /// The signing string
    pub fn concatenated(&self) -> String {
        HMAC_FIELDS.iter().map(|path| self.get(path)).collect()
    }

    fn flag(&self, path: &str) -> bool {
        self.get(path).eq_ignore_ascii_case("true")
    }

    /// Interpret the signed fields as a transaction
    pub fn to_callback(&self) -> Result<TransactionCallback, GatewayError> {
        let transaction_id = self.get("id");
        if transaction_id.is_empty() {
            return Err(GatewayError::InvalidCallback("missing transaction id".to_string()));
        }

        let provider_order_id = self.get("order.id");
        if provider_order_id.is_empty() {
            return Err(GatewayError::InvalidCallback("missing order id".to_string()));
        }

        let amount_cents = self.get("amount_cents").parse::<i64>().map_err(|_| {
            GatewayError::InvalidCallback(format!(
                "invalid amount_cents {:?}",
                self.get("amount_cents")
            ))
        })?;

        let message = Some(self.get("data.message"))
            .filter(|m| !m.is_empty())
            .map(String::from);

        Ok(TransactionCallback {
            transaction_id: transaction_id.to_string(),
            provider_order_id: provider_order_id.to_string(),
            merchant_order_id: self.get("order.merchant_order_id").parse().ok(),
            amount_cents,
            currency: self.get("currency").to_string(),
            success: self.flag("success"),
            pending: self.flag("pending"),
            is_voided: self.flag("is_voided"),
            is_refunded: self.flag("is_refunded"),
            error_occured: self.flag("error_occured"),
            message,
        })
    }
}

/// Walk a dotted path and render the leaf the way Paymob signs it
fn lookup(obj: &Value, path: &str) -> String {
    let leaf = path
        .split('.')
        .try_fold(obj, |value, key| value.get(key));

    match leaf {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Lowercase hex HMAC-SHA512 of the signing string
pub fn sign(secret: &str, fields: &CallbackFields) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(fields.concatenated().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a received signature
pub fn verify(secret: &str, fields: &CallbackFields, received: &str) -> bool {
    let Ok(expected) = hex::decode(received.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(fields.concatenated().as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// What the provider says happened to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Paid,
    Failed,
    Pending,
    Cancelled,
    Refunded,
}

impl GatewayOutcome {
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            GatewayOutcome::Paid => PaymentStatus::Paid,
            GatewayOutcome::Failed => PaymentStatus::Failed,
            GatewayOutcome::Pending => PaymentStatus::Pending,
            GatewayOutcome::Cancelled => PaymentStatus::Cancelled,
            GatewayOutcome::Refunded => PaymentStatus::Refunded,
        }
    }
}

/// A verified transaction notification
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionCallback {
    pub transaction_id: String,
    pub provider_order_id: String,
    pub merchant_order_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    pub success: bool,
    pub pending: bool,
    pub is_voided: bool,
    pub is_refunded: bool,
    pub error_occured: bool,
    pub message: Option<String>,
}

impl TransactionCallback {
    /// Voided wins over refunded, refunded over pending, pending over success.
    pub fn outcome(&self) -> GatewayOutcome {
        if self.is_voided {
            GatewayOutcome::Cancelled
        } else if self.is_refunded {
            GatewayOutcome::Refunded
        } else if self.pending {
            GatewayOutcome::Pending
        } else if self.success {
            GatewayOutcome::Paid
        } else {
            GatewayOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-hmac-secret";

    fn processed_body() -> Value {
        json!({
            "type": "TRANSACTION",
            "obj": {
                "id": 192036465,
                "pending": false,
                "amount_cents": 150050,
                "success": true,
                "is_auth": false,
                "is_capture": false,
                "is_standalone_payment": true,
                "is_voided": false,
                "is_refunded": false,
                "is_3d_secure": true,
                "integration_id": 4097558,
                "has_parent_transaction": false,
                "order": {
                    "id": 217503754,
                    "merchant_order_id": "6f1a3c2e-8d4b-4c1a-9f0e-2b7d5e8a1c33"
                },
                "created_at": "2026-03-15T10:21:07.518210",
                "currency": "EGP",
                "source_data": {
                    "pan": "2346",
                    "type": "card",
                    "sub_type": "MasterCard"
                },
                "error_occured": false,
                "owner": 302852,
                "data": { "message": "Approved" }
            }
        })
    }

    #[test]
    fn test_signing_string_order() {
        let fields = CallbackFields::from_processed_json(&processed_body()).unwrap();
        assert_eq!(
            fields.concatenated(),
            concat!(
                "150050",
                "2026-03-15T10:21:07.518210",
                "EGP",
                "false",
                "false",
                "192036465",
                "4097558",
                "true",
                "false",
                "false",
                "false",
                "true",
                "false",
                "217503754",
                "302852",
                "false",
                "2346",
                "MasterCard",
                "card",
                "true",
            )
        );
    }

    #[test]
    fn test_verify_accepts_own_signature() {
        let fields = CallbackFields::from_processed_json(&processed_body()).unwrap();
        let signature = sign(SECRET, &fields);

        assert_eq!(signature.len(), 128);
        assert!(verify(SECRET, &fields, &signature));
        assert!(verify(SECRET, &fields, &signature.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let fields = CallbackFields::from_processed_json(&processed_body()).unwrap();
        let signature = sign(SECRET, &fields);

        let mut tampered = fields.clone();
        tampered.insert("amount_cents", "100");
        assert!(!verify(SECRET, &tampered, &signature));
        assert!(!verify("other-secret", &fields, &signature));
        assert!(!verify(SECRET, &fields, "not-hex"));
        assert!(!verify(SECRET, &fields, ""));
    }

    #[test]
    fn test_redirect_query_matches_processed_json() {
        let processed = CallbackFields::from_processed_json(&processed_body()).unwrap();

        let query: HashMap<String, String> = [
            ("id", "192036465"),
            ("pending", "false"),
            ("amount_cents", "150050"),
            ("success", "true"),
            ("is_auth", "false"),
            ("is_capture", "false"),
            ("is_standalone_payment", "true"),
            ("is_voided", "false"),
            ("is_refunded", "false"),
            ("is_3d_secure", "true"),
            ("integration_id", "4097558"),
            ("has_parent_transaction", "false"),
            ("order", "217503754"),
            ("created_at", "2026-03-15T10:21:07.518210"),
            ("currency", "EGP"),
            ("source_data.pan", "2346"),
            ("source_data.type", "card"),
            ("source_data.sub_type", "MasterCard"),
            ("error_occured", "false"),
            ("owner", "302852"),
            ("merchant_order_id", "6f1a3c2e-8d4b-4c1a-9f0e-2b7d5e8a1c33"),
            ("hmac", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let redirect = CallbackFields::from_redirect_query(&query);
        assert_eq!(redirect.concatenated(), processed.concatenated());
        assert_eq!(sign(SECRET, &redirect), sign(SECRET, &processed));
    }

    #[test]
    fn test_null_fields_sign_as_empty() {
        let mut body = processed_body();
        body["obj"]["source_data"]["pan"] = Value::Null;
        let fields = CallbackFields::from_processed_json(&body).unwrap();
        assert_eq!(fields.get("source_data.pan"), "");
    }

    #[test]
    fn test_rejects_non_transaction_callbacks() {
        let body = json!({ "type": "TOKEN", "obj": {} });
        assert!(matches!(
            CallbackFields::from_processed_json(&body),
            Err(GatewayError::InvalidCallback(_))
        ));
    }

    #[test]
    fn test_to_callback() {
        let fields = CallbackFields::from_processed_json(&processed_body()).unwrap();
        let callback = fields.to_callback().unwrap();

        assert_eq!(callback.transaction_id, "192036465");
        assert_eq!(callback.provider_order_id, "217503754");
        assert_eq!(callback.amount_cents, 150050);
        assert_eq!(
            callback.merchant_order_id,
            Some("6f1a3c2e-8d4b-4c1a-9f0e-2b7d5e8a1c33".parse().unwrap())
        );
        assert_eq!(callback.message.as_deref(), Some("Approved"));
        assert_eq!(callback.outcome(), GatewayOutcome::Paid);
    }

    #[test]
    fn test_outcome_mapping() {
        let fields = CallbackFields::from_processed_json(&processed_body()).unwrap();
        let base = fields.to_callback().unwrap();

        let voided = TransactionCallback { is_voided: true, is_refunded: true, ..base.clone() };
        assert_eq!(voided.outcome(), GatewayOutcome::Cancelled);

        let refunded = TransactionCallback { is_refunded: true, ..base.clone() };
        assert_eq!(refunded.outcome(), GatewayOutcome::Refunded);

        let pending = TransactionCallback { pending: true, ..base.clone() };
        assert_eq!(pending.outcome(), GatewayOutcome::Pending);

        let declined = TransactionCallback { success: false, ..base.clone() };
        assert_eq!(declined.outcome(), GatewayOutcome::Failed);
        assert_eq!(declined.outcome().payment_status(), PaymentStatus::Failed);
    }
}
