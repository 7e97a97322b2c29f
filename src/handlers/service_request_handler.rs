//! Service Request Handler

use chrono::Utc;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::reference::{reference_number, SERVICE_REQUEST_PREFIX};
use crate::domain::{
    DomainError, Entity, OperationContext, Page, PageRequest, Principal, ServiceRequestStatus,
};
use crate::error::{AppError, AppResult};
use crate::notifications::{Notice, NotificationService};

use super::records::{ServiceRequestRecord, SERVICE_REQUEST_COLUMNS};
use super::{SubmitRequestCommand, TransitionRequestCommand};

const RESOURCE: &str = "service_request";
const PERMISSION: &str = "requests:write";

/// `GET /service-requests` filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRequestFilter {
    pub status: Option<ServiceRequestStatus>,
    pub customer_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
}

async fn lock_request(conn: &mut PgConnection, id: Uuid) -> AppResult<ServiceRequestRecord> {
    let sql = format!(
        "SELECT {} FROM service_requests WHERE id = $1 FOR UPDATE",
        SERVICE_REQUEST_COLUMNS
    );
    sqlx::query_as::<_, ServiceRequestRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DomainError::not_found(Entity::ServiceRequest, id).into())
}

/// Handler for customer service requests
pub struct ServiceRequestHandler {
    pool: PgPool,
    notifier: NotificationService,
}

impl ServiceRequestHandler {
    pub fn new(pool: PgPool, notifier: NotificationService) -> Self {
        Self { pool, notifier }
    }

    /// Customers submit for themselves; staff submit on a customer's behalf
    pub async fn submit(
        &self,
        command: SubmitRequestCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRequestRecord> {
        let customer_id = match actor.customer_id() {
            Some(own) => {
                if command.customer_id.is_some_and(|id| id != own) {
                    return Err(DomainError::Forbidden(
                        "customers can only submit their own requests".to_string(),
                    )
                    .into());
                }
                own
            }
            None => {
                actor.require(PERMISSION)?;
                command
                    .customer_id
                    .ok_or_else(|| AppError::field("customer_id", "customer_id is required"))?
            }
        };

        if command.title.trim().is_empty() {
            return Err(AppError::field("title", "title is required"));
        }

        let mut tx = self.pool.begin().await?;

        let customer_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM customers WHERE id = $1")
                .bind(customer_id)
                .fetch_optional(&mut *tx)
                .await?;
        if !customer_active.ok_or_else(|| DomainError::not_found(Entity::Customer, customer_id))? {
            return Err(DomainError::BusinessRuleViolation("customer is deactivated".to_string()).into());
        }

        let service_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM services WHERE id = $1")
                .bind(command.service_id)
                .fetch_optional(&mut *tx)
                .await?;
        if !service_active.ok_or_else(|| DomainError::not_found(Entity::Service, command.service_id))? {
            return Err(DomainError::BusinessRuleViolation(
                "service is no longer offered".to_string(),
            )
            .into());
        }

        let sql = format!(
            r#"
            INSERT INTO service_requests (id, reference, customer_id, service_id, status, title, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SERVICE_REQUEST_COLUMNS
        );
        let request: ServiceRequestRecord = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(reference_number(SERVICE_REQUEST_PREFIX, Utc::now().date_naive()))
            .bind(customer_id)
            .bind(command.service_id)
            .bind(ServiceRequestStatus::Submitted.as_str())
            .bind(command.title.trim())
            .bind(&command.details)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::unique_violation(e, "reference number already taken, retry"))?;

        AuditLogBuilder::new(AuditAction::ServiceRequestSubmitted)
            .resource(RESOURCE, request.id)
            .after_state(&request)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(
            request_id = %request.id,
            reference = %request.reference,
            customer_id = %customer_id,
            "Service request submitted"
        );

        self.notifier
            .notify(Notice::service_request_status(
                customer_id,
                request.id,
                &request.reference,
                ServiceRequestStatus::Submitted,
            ))
            .await;

        Ok(request)
    }

    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<ServiceRequestRecord> {
        let sql = format!(
            "SELECT {} FROM service_requests WHERE id = $1",
            SERVICE_REQUEST_COLUMNS
        );
        let request: Option<ServiceRequestRecord> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        request
            .filter(|r| actor.can_access_customer(r.customer_id))
            .ok_or_else(|| DomainError::not_found(Entity::ServiceRequest, id).into())
    }

    pub async fn list(
        &self,
        filter: &ServiceRequestFilter,
        page: PageRequest,
        actor: &Principal,
    ) -> AppResult<Page<ServiceRequestRecord>> {
        let customer_id = actor.customer_id().or(filter.customer_id);

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM service_requests");
        push_filters(&mut count, filter, customer_id);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(format!(
            "SELECT {} FROM service_requests",
            SERVICE_REQUEST_COLUMNS
        ));
        push_filters(&mut query, filter, customer_id);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let items = query
            .build_query_as::<ServiceRequestRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    /// Staff move a request along the workflow
    pub async fn transition(
        &self,
        command: TransitionRequestCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRequestRecord> {
        actor.require(PERMISSION)?;
        if command.status == ServiceRequestStatus::Cancelled {
            return Err(AppError::field(
                "status",
                "requests are cancelled through the cancel action",
            ));
        }
        self.change_status(command.request_id, command.status, command.note, context)
            .await
    }

    /// The owning customer (or staff) withdraws a request
    pub async fn cancel(
        &self,
        id: Uuid,
        reason: Option<String>,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRequestRecord> {
        if actor.is_staff() {
            actor.require(PERMISSION)?;
        } else {
            // Ownership is checked before the lock so strangers get a 404
            self.get(id, actor).await?;
        }

        self.change_status(id, ServiceRequestStatus::Cancelled, reason, context)
            .await
    }

    async fn change_status(
        &self,
        id: Uuid,
        next: ServiceRequestStatus,
        note: Option<String>,
        context: &OperationContext,
    ) -> AppResult<ServiceRequestRecord> {
        let mut tx = self.pool.begin().await?;

        let request = lock_request(&mut tx, id).await?;
        let current = request.status()?;

        let allowed = if next == ServiceRequestStatus::Cancelled {
            current.can_be_cancelled()
        } else {
            current.can_transition_to(next)
        };
        if !allowed {
            return Err(DomainError::invalid_transition(Entity::ServiceRequest, current, next).into());
        }

        let sql = format!(
            r#"
            UPDATE service_requests
            SET status = $2, status_note = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SERVICE_REQUEST_COLUMNS
        );
        let updated: ServiceRequestRecord = sqlx::query_as(&sql)
            .bind(id)
            .bind(next.as_str())
            .bind(&note)
            .fetch_one(&mut *tx)
            .await?;

        AuditLogBuilder::new(AuditAction::ServiceRequestStatusChanged)
            .resource(RESOURCE, id)
            .before_state(&serde_json::json!({ "status": current }))
            .after_state(&serde_json::json!({ "status": next, "note": note }))
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(request_id = %id, from = %current, to = %next, "Service request status changed");

        self.notifier
            .notify(Notice::service_request_status(
                updated.customer_id,
                updated.id,
                &updated.reference,
                next,
            ))
            .await;

        Ok(updated)
    }

    /// Hand a request to an employee
    pub async fn assign(
        &self,
        id: Uuid,
        employee_id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRequestRecord> {
        actor.require(PERMISSION)?;

        let mut tx = self.pool.begin().await?;

        let employee_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM employees WHERE id = $1")
                .bind(employee_id)
                .fetch_optional(&mut *tx)
                .await?;
        if !employee_active.ok_or_else(|| DomainError::not_found(Entity::Employee, employee_id))? {
            return Err(AppError::field("employee_id", "employee is deactivated"));
        }

        let request = lock_request(&mut tx, id).await?;
        let status = request.status()?;
        if status.is_terminal() {
            return Err(DomainError::invalid_transition(Entity::ServiceRequest, status, "assign").into());
        }

        let sql = format!(
            r#"
            UPDATE service_requests SET assigned_to = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SERVICE_REQUEST_COLUMNS
        );
        let updated: ServiceRequestRecord = sqlx::query_as(&sql)
            .bind(id)
            .bind(employee_id)
            .fetch_one(&mut *tx)
            .await?;

        AuditLogBuilder::new(AuditAction::ServiceRequestAssigned)
            .resource(RESOURCE, id)
            .before_state(&serde_json::json!({ "assigned_to": request.assigned_to }))
            .after_state(&serde_json::json!({ "assigned_to": employee_id }))
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(request_id = %id, employee_id = %employee_id, "Service request assigned");

        Ok(updated)
    }
}

fn push_filters(
    query: &mut QueryBuilder<'_, Postgres>,
    filter: &ServiceRequestFilter,
    customer_id: Option<Uuid>,
) {
    query.push(" WHERE TRUE");
    if let Some(customer_id) = customer_id {
        query.push(" AND customer_id = ").push_bind(customer_id);
    }
    if let Some(service_id) = filter.service_id {
        query.push(" AND service_id = ").push_bind(service_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
}
