//! Audit Log
//!
//! Append-only record of who changed what. Entries are written inside the
//! same transaction as the change they describe, so a rolled-back
//! operation leaves no audit trail behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::{OperationContext, Page, PageRequest};

/// Audit log entry as stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_kind: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CustomerCreated,
    CustomerUpdated,
    CustomerDeactivated,
    EmployeeCreated,
    EmployeeDeactivated,
    ServiceCreated,
    ServiceUpdated,
    ServiceDeactivated,
    ServiceRequestSubmitted,
    ServiceRequestStatusChanged,
    ServiceRequestAssigned,
    InvoiceCreated,
    InvoiceStatusChanged,
    PaymentRecorded,
    PaymentInitiated,
    PaymentReconciled,
    PaymentRefunded,
    PaymentExpired,
    WalletOpened,
    WalletMutated,
    WalletFrozen,
    WalletUnfrozen,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CustomerCreated => "customer.created",
            AuditAction::CustomerUpdated => "customer.updated",
            AuditAction::CustomerDeactivated => "customer.deactivated",
            AuditAction::EmployeeCreated => "employee.created",
            AuditAction::EmployeeDeactivated => "employee.deactivated",
            AuditAction::ServiceCreated => "service.created",
            AuditAction::ServiceUpdated => "service.updated",
            AuditAction::ServiceDeactivated => "service.deactivated",
            AuditAction::ServiceRequestSubmitted => "service_request.submitted",
            AuditAction::ServiceRequestStatusChanged => "service_request.status_changed",
            AuditAction::ServiceRequestAssigned => "service_request.assigned",
            AuditAction::InvoiceCreated => "invoice.created",
            AuditAction::InvoiceStatusChanged => "invoice.status_changed",
            AuditAction::PaymentRecorded => "payment.recorded",
            AuditAction::PaymentInitiated => "payment.initiated",
            AuditAction::PaymentReconciled => "payment.reconciled",
            AuditAction::PaymentRefunded => "payment.refunded",
            AuditAction::PaymentExpired => "payment.expired",
            AuditAction::WalletOpened => "wallet.opened",
            AuditAction::WalletMutated => "wallet.mutated",
            AuditAction::WalletFrozen => "wallet.frozen",
            AuditAction::WalletUnfrozen => "wallet.unfrozen",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: AuditAction,
    resource_type: Option<&'static str>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
        }
    }

    /// Set the resource type and id
    pub fn resource(mut self, resource_type: &'static str, resource_id: Uuid) -> Self {
        self.resource_type = Some(resource_type);
        self.resource_id = Some(resource_id);
        self
    }

    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    /// Write the entry with any executor (pool or open transaction)
    pub async fn write<'e, E>(
        self,
        executor: E,
        context: &OperationContext,
    ) -> Result<Uuid, AuditLogError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, actor_id, actor_kind, correlation_id,
                action, resource_type, resource_id,
                before_state, after_state, client_ip
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(context.actor_id)
        .bind(context.actor_kind.map(|k| k.as_str()))
        .bind(context.correlation_id)
        .bind(self.action.as_str())
        .bind(self.resource_type)
        .bind(self.resource_id)
        .bind(&self.before_state)
        .bind(&self.after_state)
        .bind(context.client_ip.map(|ip| ip.to_string()))
        .execute(executor)
        .await?;

        tracing::debug!(
            audit_id = %id,
            action = %self.action,
            resource_id = ?self.resource_id,
            "Audit log entry created"
        );

        Ok(id)
    }
}

/// Filters for listing audit entries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
}

/// Read side of the audit log
#[derive(Debug, Clone)]
pub struct AuditLogService {
    pool: PgPool,
}

impl AuditLogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
        query.push(" WHERE TRUE");
        if let Some(resource_type) = &filter.resource_type {
            query.push(" AND resource_type = ").push_bind(resource_type.clone());
        }
        if let Some(resource_id) = filter.resource_id {
            query.push(" AND resource_id = ").push_bind(resource_id);
        }
        if let Some(actor_id) = filter.actor_id {
            query.push(" AND actor_id = ").push_bind(actor_id);
        }
        if let Some(action) = &filter.action {
            query.push(" AND action = ").push_bind(action.clone());
        }
    }

    /// Newest entries first
    pub async fn list(
        &self,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<Page<AuditLogEntry>, AuditLogError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        Self::push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(
            r#"
            SELECT id, actor_id, actor_kind, correlation_id, action,
                   resource_type, resource_id, before_state, after_state,
                   client_ip, created_at
            FROM audit_logs
            "#,
        );
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let items = query
            .build_query_as::<AuditLogEntry>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
