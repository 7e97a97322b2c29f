//! API module
//!
//! HTTP API endpoints and middleware.

mod catalog;
mod invoices;
pub mod middleware;
mod notifications;
mod payments;
pub mod routes;
mod service_requests;
mod wallets;

pub use routes::create_router;
