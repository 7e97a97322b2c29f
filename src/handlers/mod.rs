//! Command Handlers module
//!
//! Handlers orchestrate business operations: they load rows, ask the domain
//! what to do, persist the result in one transaction, write the audit trail
//! and notify customers after commit.

mod catalog_handler;
mod commands;
mod invoice_handler;
mod payment_handler;
mod records;
mod service_request_handler;
mod wallet_handler;

#[cfg(test)]
mod tests;

pub use catalog_handler::{
    CustomerHandler, CustomerSearch, CustomerWithWallet, EmployeeHandler, ServiceHandler,
    ServiceListFilter,
};
pub use commands::*;
pub use invoice_handler::{InvoiceFilter, InvoiceHandler, InvoiceRefresh};
pub use payment_handler::{OnlineCheckout, PaymentFilter, PaymentHandler, Reconciliation};
pub use records::{
    CustomerRecord, EmployeeRecord, InvoiceDetail, InvoiceItemRecord, InvoiceRecord,
    PaymentRecord, ServiceRecord, ServiceRequestRecord, WalletRecord,
};
pub use service_request_handler::{ServiceRequestFilter, ServiceRequestHandler};
pub use wallet_handler::{LedgerReceipt, TransactionFilter, WalletHandler, WalletPayment};
