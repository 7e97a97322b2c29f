//! Invoice Status Machine
//!
//! Invoice status is never set directly. Manual actions (issue, send,
//! cancel) move an invoice along the lifecycle, and every payment change
//! re-derives the status from the invoice's totals:
//!
//! ```text
//! DRAFT ──issue──► ISSUED ──send──► SENT ──► PAID
//!                     │               │  ╲
//!                     └──── due ──────┴──► OVERDUE ──► PAID
//! any non-paid status ──cancel──► CANCELLED
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;

use super::{DomainError, Entity};

text_enum! {
    pub enum InvoiceStatus {
        Draft => "DRAFT",
        Issued => "ISSUED",
        Sent => "SENT",
        Paid => "PAID",
        Overdue => "OVERDUE",
        Cancelled => "CANCELLED",
    }
}

impl InvoiceStatus {
    /// Only invoices that reached the customer can be paid
    pub fn accepts_payments(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Issued | InvoiceStatus::Sent | InvoiceStatus::Overdue
        )
    }

    /// Statuses that payment activity never changes
    pub fn is_sticky(&self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Cancelled)
    }

    pub fn label_ar(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "مسودة",
            InvoiceStatus::Issued => "صادرة",
            InvoiceStatus::Sent => "مرسلة",
            InvoiceStatus::Paid => "مدفوعة",
            InvoiceStatus::Overdue => "متأخرة السداد",
            InvoiceStatus::Cancelled => "ملغاة",
        }
    }
}

/// Manual actions staff can take on an invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceAction {
    Issue,
    Send,
    Cancel,
}

impl fmt::Display for InvoiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvoiceAction::Issue => "issue",
            InvoiceAction::Send => "send",
            InvoiceAction::Cancel => "cancel",
        })
    }
}

/// Everything status derivation needs to know about an invoice
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSnapshot {
    pub status: InvoiceStatus,
    pub total: Decimal,
    /// Sum of PAID payments (refunded payments excluded)
    pub amount_paid: Decimal,
    pub due_date: Option<NaiveDate>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl InvoiceSnapshot {
    pub fn balance_due(&self) -> Decimal {
        balance_due(self.total, self.amount_paid)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.total > Decimal::ZERO && self.amount_paid >= self.total
    }

    /// Status implied by the current totals and dates
    pub fn derive_status(&self, today: NaiveDate) -> InvoiceStatus {
        derive_status(self, today)
    }
}

/// Outstanding amount, never negative
pub fn balance_due(total: Decimal, amount_paid: Decimal) -> Decimal {
    (total - amount_paid).max(Decimal::ZERO)
}

/// Derive the status an invoice should have right now.
pub fn derive_status(snapshot: &InvoiceSnapshot, today: NaiveDate) -> InvoiceStatus {
    if snapshot.status.is_sticky() {
        return snapshot.status;
    }

    if snapshot.is_fully_paid() {
        return InvoiceStatus::Paid;
    }

    if snapshot.due_date.is_some_and(|due| due < today) {
        return InvoiceStatus::Overdue;
    }

    if snapshot.sent_at.is_some() {
        InvoiceStatus::Sent
    } else {
        InvoiceStatus::Issued
    }
}

/// Apply a manual action. The result is the status the action moves to;
/// callers re-derive afterwards so an issued-but-past-due invoice lands in
/// OVERDUE right away.
pub fn transition(
    snapshot: &InvoiceSnapshot,
    action: InvoiceAction,
) -> Result<InvoiceStatus, DomainError> {
    use InvoiceStatus::*;

    let next = match (snapshot.status, action) {
        (Draft, InvoiceAction::Issue) => Issued,
        (Issued | Sent | Overdue, InvoiceAction::Send) => Sent,
        (Paid | Cancelled, InvoiceAction::Cancel) => {
            return Err(DomainError::invalid_transition(
                Entity::Invoice,
                snapshot.status,
                action,
            ))
        }
        (_, InvoiceAction::Cancel) => {
            if snapshot.amount_paid > Decimal::ZERO {
                return Err(DomainError::InvoiceHasPayments);
            }
            Cancelled
        }
        (from, action) => {
            return Err(DomainError::invalid_transition(Entity::Invoice, from, action))
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    fn snapshot(status: InvoiceStatus, total: Decimal, paid: Decimal) -> InvoiceSnapshot {
        InvoiceSnapshot {
            status,
            total,
            amount_paid: paid,
            due_date: NaiveDate::from_ymd_opt(2026, 3, 31),
            sent_at: None,
        }
    }

    #[test]
    fn test_draft_and_cancelled_are_sticky() {
        let draft = snapshot(InvoiceStatus::Draft, dec!(100), dec!(100));
        assert_eq!(draft.derive_status(today()), InvoiceStatus::Draft);

        let cancelled = snapshot(InvoiceStatus::Cancelled, dec!(100), dec!(0));
        assert_eq!(cancelled.derive_status(today()), InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_fully_paid_becomes_paid() {
        let inv = snapshot(InvoiceStatus::Sent, dec!(100), dec!(100));
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Paid);

        // Payment after the due date still settles the invoice
        let mut late = snapshot(InvoiceStatus::Overdue, dec!(100), dec!(120));
        late.due_date = NaiveDate::from_ymd_opt(2026, 1, 1);
        assert_eq!(late.derive_status(today()), InvoiceStatus::Paid);
    }

    #[test]
    fn test_partial_payment_keeps_open_status() {
        let inv = snapshot(InvoiceStatus::Issued, dec!(100), dec!(40));
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Issued);
        assert_eq!(inv.balance_due(), dec!(60));
    }

    #[test]
    fn test_past_due_becomes_overdue() {
        let mut inv = snapshot(InvoiceStatus::Sent, dec!(100), dec!(10));
        inv.due_date = NaiveDate::from_ymd_opt(2026, 3, 14);
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Overdue);

        // Due today is not overdue yet
        inv.due_date = Some(today());
        inv.sent_at = Some(Utc::now());
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Sent);
    }

    #[test]
    fn test_refund_reverts_paid_invoice() {
        let mut inv = snapshot(InvoiceStatus::Paid, dec!(100), dec!(0));
        inv.sent_at = Some(Utc::now());
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Sent);

        inv.sent_at = None;
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Issued);
    }

    #[test]
    fn test_zero_total_is_never_paid_by_derivation() {
        let inv = snapshot(InvoiceStatus::Issued, dec!(0), dec!(0));
        assert_eq!(inv.derive_status(today()), InvoiceStatus::Issued);
    }

    #[test]
    fn test_issue_only_from_draft() {
        let draft = snapshot(InvoiceStatus::Draft, dec!(100), dec!(0));
        assert_eq!(transition(&draft, InvoiceAction::Issue), Ok(InvoiceStatus::Issued));

        let sent = snapshot(InvoiceStatus::Sent, dec!(100), dec!(0));
        assert!(matches!(
            transition(&sent, InvoiceAction::Issue),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_send_and_resend() {
        for status in [InvoiceStatus::Issued, InvoiceStatus::Sent, InvoiceStatus::Overdue] {
            let inv = snapshot(status, dec!(100), dec!(0));
            assert_eq!(transition(&inv, InvoiceAction::Send), Ok(InvoiceStatus::Sent));
        }

        let draft = snapshot(InvoiceStatus::Draft, dec!(100), dec!(0));
        assert!(transition(&draft, InvoiceAction::Send).is_err());
    }

    #[test]
    fn test_cancel_rules() {
        let draft = snapshot(InvoiceStatus::Draft, dec!(100), dec!(0));
        assert_eq!(transition(&draft, InvoiceAction::Cancel), Ok(InvoiceStatus::Cancelled));

        let partially_paid = snapshot(InvoiceStatus::Sent, dec!(100), dec!(1));
        assert_eq!(
            transition(&partially_paid, InvoiceAction::Cancel),
            Err(DomainError::InvoiceHasPayments)
        );

        let paid = snapshot(InvoiceStatus::Paid, dec!(100), dec!(100));
        assert!(matches!(
            transition(&paid, InvoiceAction::Cancel),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_accepts_payments() {
        assert!(!InvoiceStatus::Draft.accepts_payments());
        assert!(InvoiceStatus::Issued.accepts_payments());
        assert!(InvoiceStatus::Overdue.accepts_payments());
        assert!(!InvoiceStatus::Paid.accepts_payments());
        assert!(!InvoiceStatus::Cancelled.accepts_payments());
    }
}
