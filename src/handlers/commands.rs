//! Command definitions
//!
//! Commands represent intentions to change the system state. They carry
//! already-parsed values; request-shape validation happens at the API
//! boundary.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Amount, Direction, LedgerOperation, PaymentMethod, ServiceRequestStatus,
};

// =========================================================================
// Wallet
// =========================================================================

/// Staff-initiated balance change: deposit, withdrawal or adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCommand {
    pub wallet_id: Uuid,
    pub operation: LedgerOperation,
    pub amount: Amount,
    pub description: Option<String>,
    pub reference_id: Option<Uuid>,
}

impl LedgerCommand {
    pub fn deposit(wallet_id: Uuid, amount: Amount) -> Self {
        Self::new(wallet_id, LedgerOperation::Deposit, amount)
    }

    pub fn withdraw(wallet_id: Uuid, amount: Amount) -> Self {
        Self::new(wallet_id, LedgerOperation::Withdrawal, amount)
    }

    pub fn adjust(wallet_id: Uuid, direction: Direction, amount: Amount) -> Self {
        Self::new(wallet_id, LedgerOperation::Adjustment(direction), amount)
    }

    fn new(wallet_id: Uuid, operation: LedgerOperation, amount: Amount) -> Self {
        Self {
            wallet_id,
            operation,
            amount,
            description: None,
            reference_id: None,
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_reference(mut self, reference_id: Uuid) -> Self {
        self.reference_id = Some(reference_id);
        self
    }
}

/// Pay an invoice from the customer's wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayWithWalletCommand {
    pub invoice_id: Uuid,
    /// Defaults to the invoice's balance due
    pub amount: Option<Amount>,
}

// =========================================================================
// Payments
// =========================================================================

/// Staff records money received offline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentCommand {
    pub invoice_id: Uuid,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

/// What an online payment pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PaymentTarget {
    Invoice(Uuid),
    WalletTopUp(Uuid),
}

/// Start a card payment through the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentCommand {
    pub target: PaymentTarget,
    /// Required for top-ups; defaults to the balance due for invoices
    pub amount: Option<Amount>,
}

// =========================================================================
// Invoices
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl InvoiceItemInput {
    /// quantity × unit price, rounded to 2 decimal places. `None` when the
    /// product does not fit in a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.quantity
            .checked_mul(self.unit_price)
            .map(|total| total.round_dp(2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceCommand {
    pub customer_id: Uuid,
    pub service_request_id: Option<Uuid>,
    pub items: Vec<InvoiceItemInput>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl CreateInvoiceCommand {
    pub fn total(&self) -> Option<Decimal> {
        self.items
            .iter()
            .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.line_total()?))
    }
}

// =========================================================================
// Service requests
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequestCommand {
    /// Required when staff submit on a customer's behalf
    pub customer_id: Option<Uuid>,
    pub service_id: Uuid,
    pub title: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequestCommand {
    pub request_id: Uuid,
    pub status: ServiceRequestStatus,
    pub note: Option<String>,
}

// =========================================================================
// Catalog
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerCommand {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCustomerCommand {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
}

impl UpdateCustomerCommand {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.organization.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEmployeeCommand {
    pub name: String,
    pub email: String,
    pub job_title: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceCommand {
    pub code: String,
    pub name_en: String,
    pub name_ar: String,
    pub description: Option<String>,
    pub base_price: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateServiceCommand {
    pub name_en: Option<String>,
    pub name_ar: Option<String>,
    pub description: Option<String>,
    pub base_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_invoice_total_rounds_each_line() {
        let command = CreateInvoiceCommand {
            customer_id: Uuid::new_v4(),
            service_request_id: None,
            items: vec![
                InvoiceItemInput {
                    description: "Concrete compression test".to_string(),
                    quantity: dec!(3),
                    unit_price: dec!(333.333),
                },
                InvoiceItemInput {
                    description: "Site visit".to_string(),
                    quantity: dec!(1.5),
                    unit_price: dec!(200),
                },
            ],
            due_date: None,
            notes: None,
        };

        assert_eq!(command.items[0].line_total(), Some(dec!(1000.00)));
        assert_eq!(command.total(), Some(dec!(1300.00)));
    }

    #[test]
    fn test_line_total_overflow_is_none() {
        let huge = InvoiceItemInput {
            description: "Bulk sampling".to_string(),
            quantity: Decimal::MAX,
            unit_price: dec!(2),
        };
        assert_eq!(huge.line_total(), None);

        let command = CreateInvoiceCommand {
            customer_id: Uuid::new_v4(),
            service_request_id: None,
            items: vec![
                InvoiceItemInput {
                    description: "Bulk sampling".to_string(),
                    quantity: Decimal::MAX,
                    unit_price: dec!(1),
                },
                InvoiceItemInput {
                    description: "Report".to_string(),
                    quantity: dec!(1),
                    unit_price: dec!(1),
                },
            ],
            due_date: None,
            notes: None,
        };
        assert_eq!(command.total(), None);
    }

    #[test]
    fn test_ledger_command_builders() {
        let wallet_id = Uuid::new_v4();
        let amount = Amount::new(dec!(10)).unwrap();

        let command = LedgerCommand::adjust(wallet_id, Direction::Debit, amount)
            .with_description("Correction".to_string());

        assert_eq!(command.operation, LedgerOperation::Adjustment(Direction::Debit));
        assert_eq!(command.description.as_deref(), Some("Correction"));
    }

    #[test]
    fn test_payment_target_serde() {
        let id = Uuid::nil();
        let json = serde_json::to_value(PaymentTarget::WalletTopUp(id)).unwrap();
        assert_eq!(json["kind"], "wallet_top_up");
    }
}
