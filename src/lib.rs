//! HBRC Platform Library
//!
//! Re-exports modules for integration testing and the binaries.

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod notifications;
pub mod state;
mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext, Principal};
pub use error::{AppError, AppResult};
pub use state::AppState;
