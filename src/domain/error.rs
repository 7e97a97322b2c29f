//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.
//! Each error knows its English text (`Display`) and its Arabic text
//! (`message_ar`), so the HTTP layer can answer bilingually.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Entities that can be looked up by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Customer,
    Employee,
    Service,
    ServiceRequest,
    Invoice,
    Payment,
    Wallet,
    Notification,
}

impl Entity {
    /// Machine-readable code prefix (`invoice` → `invoice_not_found`)
    pub fn code(&self) -> &'static str {
        match self {
            Entity::Customer => "customer",
            Entity::Employee => "employee",
            Entity::Service => "service",
            Entity::ServiceRequest => "service_request",
            Entity::Invoice => "invoice",
            Entity::Payment => "payment",
            Entity::Wallet => "wallet",
            Entity::Notification => "notification",
        }
    }

    pub fn label_en(&self) -> &'static str {
        match self {
            Entity::Customer => "Customer",
            Entity::Employee => "Employee",
            Entity::Service => "Service",
            Entity::ServiceRequest => "Service request",
            Entity::Invoice => "Invoice",
            Entity::Payment => "Payment",
            Entity::Wallet => "Wallet",
            Entity::Notification => "Notification",
        }
    }

    pub fn label_ar(&self) -> &'static str {
        match self {
            Entity::Customer => "العميل",
            Entity::Employee => "الموظف",
            Entity::Service => "الخدمة",
            Entity::ServiceRequest => "طلب الخدمة",
            Entity::Invoice => "الفاتورة",
            Entity::Payment => "عملية الدفع",
            Entity::Wallet => "المحفظة",
            Entity::Notification => "الإشعار",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_en())
    }
}

/// Domain-specific errors
///
/// These represent business rule violations and domain invariant failures,
/// independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Uuid },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Wallet is frozen: {reason}")]
    WalletFrozen { reason: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("{entity} cannot go from {from} via {action}")]
    InvalidTransition {
        entity: Entity,
        from: String,
        action: String,
    },

    #[error("Invoice in status {status} does not accept payments")]
    InvoiceNotPayable { status: String },

    #[error("Payment of {attempted} exceeds the balance due of {balance_due}")]
    Overpayment { attempted: Decimal, balance_due: Decimal },

    #[error("Invoice has recorded payments and cannot be cancelled")]
    InvoiceHasPayments,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// Optimistic locking failure on a versioned row
    #[error("Version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: i64, found: i64 },

    #[error("Duplicate operation: {key}")]
    DuplicateOperation { key: String },
}

impl DomainError {
    pub fn not_found(entity: Entity, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }

    pub fn wallet_frozen(reason: impl Into<String>) -> Self {
        Self::WalletFrozen {
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(
        entity: Entity,
        from: impl fmt::Display,
        action: impl fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    /// Arabic rendering of the error, for bilingual responses
    pub fn message_ar(&self) -> String {
        match self {
            Self::NotFound { entity, .. } => format!("{} غير موجود", entity.label_ar()),
            Self::InsufficientBalance {
                required,
                available,
            } => format!(
                "الرصيد غير كافٍ: المطلوب {:.2}، المتاح {:.2}",
                required, available
            ),
            Self::WalletFrozen { .. } => "المحفظة مجمدة".to_string(),
            Self::InvalidAmount(_) => "المبلغ غير صالح".to_string(),
            Self::InvalidTransition { entity, .. } => {
                format!("لا يمكن تغيير حالة {} بهذا الإجراء", entity.label_ar())
            }
            Self::InvoiceNotPayable { .. } => "لا يمكن سداد الفاتورة في حالتها الحالية".to_string(),
            Self::Overpayment { balance_due, .. } => {
                format!("المبلغ يتجاوز المستحق على الفاتورة ({:.2})", balance_due)
            }
            Self::InvoiceHasPayments => "لا يمكن إلغاء فاتورة عليها مدفوعات".to_string(),
            Self::Forbidden(_) => "غير مسموح لك بتنفيذ هذا الإجراء".to_string(),
            Self::BusinessRuleViolation(_) => "العملية تخالف قواعد العمل".to_string(),
            Self::VersionConflict { .. } => {
                "تم تعديل البيانات بواسطة عملية أخرى، يرجى إعادة المحاولة".to_string()
            }
            Self::DuplicateOperation { .. } => "تم تنفيذ هذه العملية من قبل".to_string(),
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        !self.is_conflict_error()
    }

    /// Check if this is a conflict error (retry may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::DuplicateOperation { .. }
        )
    }
}
