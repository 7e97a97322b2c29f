//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::gateway::PaymentGateway;
use crate::notifications::{NotificationHub, NotificationService};

/// State handed to every route and middleware
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// `None` when online payments are not configured
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub hub: NotificationHub,
    /// Currency for new wallets and invoices
    pub currency: String,
}

impl AppState {
    pub fn new(pool: PgPool, currency: impl Into<String>) -> Self {
        Self {
            pool,
            gateway: None,
            hub: NotificationHub::new(),
            currency: currency.into(),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn notifier(&self) -> NotificationService {
        NotificationService::new(self.pool.clone(), self.hub.clone())
    }
}
