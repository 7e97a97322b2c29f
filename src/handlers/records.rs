//! Row types
//!
//! One struct per table, read with `sqlx::FromRow` and returned to clients
//! as-is. Status columns are TEXT; the typed accessors parse them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    invoice_status, Direction, InvoiceSnapshot, InvoiceStatus, LedgerEntry, PaymentMethod,
    PaymentPurpose, PaymentStatus, ServiceRequestStatus, UnknownVariant, Wallet, WalletStatus,
    WalletTransactionType,
};
use crate::error::AppError;

// =========================================================================
// Catalog
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CustomerRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const CUSTOMER_COLUMNS: &str =
    "id, name, email, phone, organization, is_active, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmployeeRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub job_title: Option<String>,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const EMPLOYEE_COLUMNS: &str =
    "id, name, email, job_title, permissions, is_active, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub code: String,
    pub name_en: String,
    pub name_ar: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const SERVICE_COLUMNS: &str =
    "id, code, name_en, name_ar, description, base_price, is_active, created_at, updated_at";

// =========================================================================
// Service requests
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceRequestRecord {
    pub id: Uuid,
    pub reference: String,
    pub customer_id: Uuid,
    pub service_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub status: String,
    pub title: String,
    pub details: Option<String>,
    pub status_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const SERVICE_REQUEST_COLUMNS: &str = "id, reference, customer_id, service_id, \
     assigned_to, status, title, details, status_note, created_at, updated_at";

impl ServiceRequestRecord {
    pub fn status(&self) -> Result<ServiceRequestStatus, UnknownVariant> {
        self.status.parse()
    }
}

// =========================================================================
// Invoices
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub service_request_id: Option<Uuid>,
    pub status: String,
    pub currency: String,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const INVOICE_COLUMNS: &str = "id, invoice_number, customer_id, service_request_id, \
     status, currency, total, amount_paid, due_date, notes, issued_at, sent_at, paid_at, \
     cancelled_at, created_at, updated_at";

impl InvoiceRecord {
    pub fn status(&self) -> Result<InvoiceStatus, UnknownVariant> {
        self.status.parse()
    }

    pub fn snapshot(&self) -> Result<InvoiceSnapshot, UnknownVariant> {
        Ok(InvoiceSnapshot {
            status: self.status()?,
            total: self.total,
            amount_paid: self.amount_paid,
            due_date: self.due_date,
            sent_at: self.sent_at,
        })
    }

    pub fn balance_due(&self) -> Decimal {
        invoice_status::balance_due(self.total, self.amount_paid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceItemRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub position: i32,
}

/// Invoice with its line items and outstanding balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: InvoiceRecord,
    pub balance_due: Decimal,
    pub items: Vec<InvoiceItemRecord>,
}

// =========================================================================
// Payments
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub wallet_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub purpose: String,
    pub method: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub provider: Option<String>,
    pub provider_order_id: Option<String>,
    pub provider_txn_id: Option<String>,
    pub failure_reason: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const PAYMENT_COLUMNS: &str = "id, invoice_id, wallet_id, customer_id, purpose, \
     method, status, amount, currency, reference, provider, provider_order_id, \
     provider_txn_id, failure_reason, recorded_by, paid_at, created_at, updated_at";

impl PaymentRecord {
    pub fn status(&self) -> Result<PaymentStatus, UnknownVariant> {
        self.status.parse()
    }

    pub fn method(&self) -> Result<PaymentMethod, UnknownVariant> {
        self.method.parse()
    }

    pub fn purpose(&self) -> Result<PaymentPurpose, UnknownVariant> {
        self.purpose.parse()
    }
}

// =========================================================================
// Wallets
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletRecord {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
    pub status: String,
    pub frozen_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const WALLET_COLUMNS: &str =
    "id, customer_id, currency, balance, status, frozen_reason, version, created_at, updated_at";

impl WalletRecord {
    pub fn to_domain(&self) -> Result<Wallet, AppError> {
        let status: WalletStatus = self.status.parse()?;
        Ok(Wallet::from_db_state(
            self.id,
            self.customer_id,
            self.currency.clone(),
            self.balance,
            status,
            self.frozen_reason.clone(),
            self.version,
        )?)
    }

    /// The record after the domain wallet changed
    pub fn updated_from(mut self, wallet: &Wallet) -> Self {
        self.balance = wallet.balance();
        self.status = wallet.status().to_string();
        self.frozen_reason = wallet.frozen_reason().map(String::from);
        self.version = wallet.version();
        self.updated_at = Utc::now();
        self
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LedgerRecord {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub sequence: i64,
    pub kind: String,
    pub direction: String,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) const LEDGER_COLUMNS: &str = "id, wallet_id, sequence, kind, direction, amount, \
     balance_before, balance_after, reference_id, description, created_at";

impl TryFrom<LedgerRecord> for LedgerEntry {
    type Error = UnknownVariant;

    fn try_from(row: LedgerRecord) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            wallet_id: row.wallet_id,
            sequence: row.sequence,
            kind: row.kind.parse::<WalletTransactionType>()?,
            direction: row.direction.parse::<Direction>()?,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            reference_id: row.reference_id,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn invoice(status: &str, total: Decimal, paid: Decimal) -> InvoiceRecord {
        let now = Utc::now();
        InvoiceRecord {
            id: Uuid::new_v4(),
            invoice_number: "INV-20260315-AAAAAA".to_string(),
            customer_id: Uuid::new_v4(),
            service_request_id: None,
            status: status.to_string(),
            currency: "EGP".to_string(),
            total,
            amount_paid: paid,
            due_date: None,
            notes: None,
            issued_at: None,
            sent_at: None,
            paid_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_invoice_record_snapshot() {
        let record = invoice("SENT", dec!(500), dec!(120));
        let snapshot = record.snapshot().unwrap();

        assert_eq!(snapshot.status, InvoiceStatus::Sent);
        assert_eq!(record.balance_due(), dec!(380));
        assert!(invoice("BOGUS", dec!(1), dec!(0)).snapshot().is_err());
    }

    #[test]
    fn test_invoice_detail_flattens() {
        let detail = InvoiceDetail {
            invoice: invoice("DRAFT", dec!(10), dec!(0)),
            balance_due: dec!(10),
            items: Vec::new(),
        };

        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["status"], "DRAFT");
        assert_eq!(json["invoice_number"], "INV-20260315-AAAAAA");
        assert!(json["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_wallet_record_round_trip_through_domain() {
        let now = Utc::now();
        let record = WalletRecord {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            currency: "EGP".to_string(),
            balance: dec!(75),
            status: "ACTIVE".to_string(),
            frozen_reason: None,
            version: 3,
            created_at: now,
            updated_at: now,
        };

        let wallet = record.to_domain().unwrap().freeze("review").unwrap();
        let updated = record.updated_from(&wallet);
        assert_eq!(updated.status, "FROZEN");
        assert_eq!(updated.frozen_reason.as_deref(), Some("review"));
        assert_eq!(updated.version, 3);
    }
}
