//! Domain module
//!
//! Core domain types and business logic. Nothing in here touches the
//! database or HTTP; handlers load rows, ask the domain what to do, and
//! persist the answer.

/// Declares a status-like enum stored as upper-case text in the database
/// and on the wire.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::domain::UnknownVariant {
                        type_name: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod amount;
pub mod context;
pub mod error;
pub mod invoice_status;
pub mod page;
pub mod reference;
pub mod status;
pub mod wallet;

pub use amount::{Amount, AmountError, Balance, MAX_AMOUNT, MAX_SCALE};
pub use context::{OperationContext, Principal, PrincipalKind};
pub use error::{DomainError, Entity};
pub use invoice_status::{InvoiceAction, InvoiceSnapshot, InvoiceStatus};
pub use page::{Page, PageRequest};
pub use status::{PaymentMethod, PaymentPurpose, PaymentStatus, ServiceRequestStatus};
pub use wallet::{
    Direction, LedgerEntry, LedgerOperation, LedgerVerification, Wallet, WalletStatus,
    WalletTransactionType,
};

/// A stored status string that matches no known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {type_name} value: {value}")]
pub struct UnknownVariant {
    pub type_name: &'static str,
    pub value: String,
}
