//! Payment and service-request lifecycles

text_enum! {
    /// Lifecycle of a single payment
    pub enum PaymentStatus {
        Pending => "PENDING",
        Paid => "PAID",
        Failed => "FAILED",
        Refunded => "REFUNDED",
        Cancelled => "CANCELLED",
    }
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Pending may settle any way; a settled payment can only be refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        match (self, next) {
            (PaymentStatus::Pending, PaymentStatus::Pending) => false,
            (PaymentStatus::Pending, _) => true,
            (PaymentStatus::Paid, PaymentStatus::Refunded) => true,
            _ => false,
        }
    }

    /// A verified capture for a checkout the expiry job already cancelled.
    /// The provider holds the money, so it still has to be settled.
    pub fn accepts_late_settlement(&self, next: PaymentStatus) -> bool {
        matches!((self, next), (PaymentStatus::Cancelled, PaymentStatus::Paid))
    }
}

text_enum! {
    pub enum PaymentMethod {
        Cash => "CASH",
        BankTransfer => "BANK_TRANSFER",
        /// Online card payment through the gateway
        Card => "CARD",
        Wallet => "WALLET",
    }
}

impl PaymentMethod {
    /// Methods staff may record by hand
    pub fn is_manual(&self) -> bool {
        matches!(self, PaymentMethod::Cash | PaymentMethod::BankTransfer)
    }
}

text_enum! {
    /// What a payment settles
    pub enum PaymentPurpose {
        Invoice => "INVOICE",
        WalletTopUp => "WALLET_TOP_UP",
    }
}

text_enum! {
    pub enum ServiceRequestStatus {
        Submitted => "SUBMITTED",
        UnderReview => "UNDER_REVIEW",
        Approved => "APPROVED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Rejected => "REJECTED",
        Cancelled => "CANCELLED",
    }
}

impl ServiceRequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceRequestStatus::Completed
                | ServiceRequestStatus::Rejected
                | ServiceRequestStatus::Cancelled
        )
    }

    /// Staff-driven workflow transitions. Cancellation is the customer's
    /// and goes through `can_be_cancelled`.
    pub fn can_transition_to(&self, next: ServiceRequestStatus) -> bool {
        use ServiceRequestStatus::*;
        matches!(
            (self, next),
            (Submitted, UnderReview)
                | (Submitted, Rejected)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Approved, InProgress)
                | (InProgress, Completed)
        )
    }

    /// The customer may withdraw a request until work is approved
    pub fn can_be_cancelled(&self) -> bool {
        matches!(
            self,
            ServiceRequestStatus::Submitted | ServiceRequestStatus::UnderReview
        )
    }

    pub fn label_ar(&self) -> &'static str {
        match self {
            ServiceRequestStatus::Submitted => "مُقدَّم",
            ServiceRequestStatus::UnderReview => "قيد المراجعة",
            ServiceRequestStatus::Approved => "مقبول",
            ServiceRequestStatus::InProgress => "قيد التنفيذ",
            ServiceRequestStatus::Completed => "مكتمل",
            ServiceRequestStatus::Rejected => "مرفوض",
            ServiceRequestStatus::Cancelled => "ملغي",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_round_trip_text() {
        for status in PaymentStatus::ALL {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), *status);
        }
        assert!("SETTLED".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_payment_status_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Paid.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Cancelled.can_transition_to(PaymentStatus::Paid));
    }

    #[test]
    fn test_only_cancelled_to_paid_settles_late() {
        assert!(PaymentStatus::Cancelled.accepts_late_settlement(PaymentStatus::Paid));
        assert!(!PaymentStatus::Cancelled.accepts_late_settlement(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.accepts_late_settlement(PaymentStatus::Paid));
        assert!(!PaymentStatus::Pending.accepts_late_settlement(PaymentStatus::Paid));
    }

    #[test]
    fn test_payment_method_serde() {
        let json = serde_json::to_string(&PaymentMethod::BankTransfer).unwrap();
        assert_eq!(json, r#""BANK_TRANSFER""#);
        assert!(PaymentMethod::Cash.is_manual());
        assert!(!PaymentMethod::Wallet.is_manual());
    }

    #[test]
    fn test_service_request_workflow() {
        use ServiceRequestStatus::*;

        assert!(Submitted.can_transition_to(UnderReview));
        assert!(UnderReview.can_transition_to(Approved));
        assert!(Approved.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));

        assert!(!Submitted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Approved.can_transition_to(Rejected));
    }

    #[test]
    fn test_service_request_cancellation_window() {
        use ServiceRequestStatus::*;

        assert!(Submitted.can_be_cancelled());
        assert!(UnderReview.can_be_cancelled());
        assert!(!Approved.can_be_cancelled());
        assert!(!InProgress.can_be_cancelled());
        assert!(!Cancelled.can_be_cancelled());

        // Staff transitions never cancel on the customer's behalf
        for status in ServiceRequestStatus::ALL {
            assert!(!status.can_transition_to(Cancelled));
        }
    }
}
